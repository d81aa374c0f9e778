use crate::invariants::debug_assert_taken_payload;
use crate::Backoff;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// A singly linked chain headed by a sentinel. Three atomic cursors:
//
// - `head`: the front node. The initial sentinel carries no payload; after
//   advances the head is whichever node was most recently passed, its
//   payload claimed or about to be.
// - `tail`: the node believed to be last in the main chain. `tail.next` is
//   CAS-installed at most once, after which `tail` advances.
// - `alt_tail`: usually null; the root of a temporary side chain absorbing
//   enqueue contention while the main tail is being extended.
//
// ## Enqueue
//
// Fast path: one CAS on `tail.next`. Under contention that single hot word
// degrades, so losers move to the side chain: the first of them (the root)
// parks its node in `alt_tail` and takes over splicing; the rest extend the
// side chain by racing on its last node's `next`, which spreads the traffic
// across the chain instead of one word. The root splices the side chain
// into the main chain under back-off, then swaps `alt_tail` out and
// publishes the furthest side-chain node as `tail`.
//
// A straggler that extended the side chain right as the root cleared it
// recovers by CASing `tail` from its predecessor to its own node: the
// predecessor either already is the published tail or is about to be.
//
// A buffered enqueue does not return until its segment is spliced. Each
// side-chain node carries a `spliced` flag; the root sets its own right
// after the splice CAS, and every waiter spins on its predecessor's flag
// before setting its own. The wait chain bottoms out at the root, so when
// any enqueue returns, its node is reachable from the main chain, and a
// producer's next enqueue can only link after it. That is what makes
// dequeue order respect per-producer enqueue order.
//
// Every link is published by a release CAS and observed by acquire loads,
// so a node's payload (written at construction) is visible wherever the
// node is reachable.
//
// ## Dequeue
//
// Payloads are claimed by flipping `has_value` true→false; exactly one
// claimant wins per node. `head` is advanced opportunistically past the
// front node whenever a successor exists, regardless of who claimed the
// payload; the winner of that advance retires the passed node through the
// epoch. The payload itself is never cleared: iteration snapshots yield it
// until the node is retired.
//
// =============================================================================

/// One link in the chain.
struct Node<T> {
    /// Payload; `None` only for the initial sentinel. Never cleared after
    /// construction, which is what lets iteration yield every enqueued item
    /// whether or not a dequeuer has claimed it.
    value: Option<T>,
    /// False for the sentinel and for nodes whose payload has been taken.
    has_value: AtomicBool,
    /// Successor link, CAS-installed from null at most once.
    next: Atomic<Node<T>>,
    /// True once the side-chain segment this node belongs to has been
    /// spliced into the main chain. Meaningful only for nodes published
    /// through `alt_tail`; waiters spin on their predecessor's flag and the
    /// root seeds the chain of flags after its splice lands.
    spliced: AtomicBool,
}

impl<T> Node<T> {
    fn new(value: T) -> Self {
        Self {
            value: Some(value),
            has_value: AtomicBool::new(true),
            next: Atomic::null(),
            spliced: AtomicBool::new(false),
        }
    }

    fn sentinel() -> Self {
        Self {
            value: None,
            has_value: AtomicBool::new(false),
            next: Atomic::null(),
            spliced: AtomicBool::new(false),
        }
    }
}

/// A multi-producer multi-consumer FIFO queue optimized for high-contention
/// enqueue.
///
/// Enqueues that lose the race on the main tail accumulate on a temporary
/// side chain and are spliced into the main chain in one step, converting
/// one hot CAS word into a distributed chain build-up. An enqueue returns
/// only once its node is linked into the main chain, so each producer's
/// items are dequeued in that producer's enqueue order; items that meet on
/// the side chain keep their pairwise order.
///
/// [`BufferedQueue::try_dequeue`] never blocks; there is no blocking wait
/// for elements.
pub struct BufferedQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    alt_tail: CachePadded<Atomic<Node<T>>>,
}

impl<T> BufferedQueue<T> {
    /// Creates an empty queue: a lone sentinel that is both head and tail.
    pub fn new() -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            alt_tail: CachePadded::new(Atomic::null()),
        };
        // SAFETY: construction is single-threaded; nothing can observe the
        // queue before it is returned.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = Owned::new(Node::sentinel()).into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }
        queue
    }

    /// Appends an item to the queue.
    pub fn enqueue(&self, item: T) {
        let guard = epoch::pin();
        let node = Owned::new(Node::new(item)).into_shared(&guard);

        // Fast path: one CAS on the main tail's successor.
        let tail = self.tail.load(Ordering::Acquire, &guard);
        // SAFETY: `tail` is never null and stays alive while pinned.
        if unsafe { tail.deref() }
            .next
            .compare_exchange(
                Shared::null(),
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            )
            .is_ok()
        {
            // Plain publish is enough: enqueuers that read a stale tail
            // recover through the CAS loops below.
            self.tail.store(node, Ordering::Release);
            return;
        }

        self.enqueue_buffered(node, &guard);
    }

    /// Contended path: park the node on the side chain.
    fn enqueue_buffered(&self, node: Shared<'_, Node<T>>, guard: &Guard) {
        let mut backoff = Backoff::new();
        loop {
            match self.alt_tail.compare_exchange(
                Shared::null(),
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                // Root case: this node roots the side chain, and this thread
                // owes the splice into the main chain.
                Ok(_) => {
                    let mut splice_backoff = Backoff::new();
                    loop {
                        let tail = self.tail.load(Ordering::Acquire, guard);
                        // SAFETY: `tail` is never null.
                        if unsafe { tail.deref() }
                            .next
                            .compare_exchange(
                                Shared::null(),
                                node,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                                guard,
                            )
                            .is_ok()
                        {
                            break;
                        }
                        splice_backoff.snooze();
                    }
                    // The side chain is in the main chain now. Seed the flag
                    // chain the segment's waiters spin on, then hand the
                    // furthest side-chain node back as the published tail.
                    // SAFETY: `node` stays alive while pinned.
                    unsafe { node.deref() }.spliced.store(true, Ordering::Release);
                    let chain_end = self.alt_tail.swap(Shared::null(), Ordering::AcqRel, guard);
                    self.tail.store(chain_end, Ordering::Release);
                    return;
                }
                // Non-root case: extend the side chain at its current end.
                Err(err) => {
                    let last = err.current;
                    // SAFETY: a non-null `alt_tail` stays alive while pinned.
                    let installed = unsafe { last.deref() }
                        .next
                        .compare_exchange(
                            Shared::null(),
                            node,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            guard,
                        )
                        .is_ok();
                    if installed {
                        // SAFETY: both nodes stay alive while pinned.
                        let (node_ref, last_ref) = unsafe { (node.deref(), last.deref()) };
                        if self
                            .alt_tail
                            .compare_exchange(
                                last,
                                node,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                                guard,
                            )
                            .is_ok()
                        {
                            // The segment is not in the main chain yet.
                            // Returning now would let this thread's next
                            // enqueue overtake this one through the fast
                            // path, so wait for the splice: the flag
                            // propagates from the segment root, one
                            // predecessor at a time.
                            let mut splice_wait = Backoff::new();
                            while !last_ref.spliced.load(Ordering::Acquire) {
                                splice_wait.snooze();
                            }
                            node_ref.spliced.store(true, Ordering::Release);
                            return;
                        }
                        // The root cleared the side chain between our two
                        // CASes, so the splice already landed: `last` is in
                        // the main chain, and this node hangs off it.
                        node_ref.spliced.store(true, Ordering::Release);
                        // `last` is the published tail or about to become it.
                        let mut tail_backoff = Backoff::new();
                        while self
                            .tail
                            .compare_exchange(
                                last,
                                node,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                                guard,
                            )
                            .is_err()
                        {
                            tail_backoff.snooze();
                        }
                        return;
                    }
                    // Someone else extended `last` first; re-read the side
                    // chain end and try again.
                    backoff.snooze();
                }
            }
        }
    }

    /// Takes the oldest unclaimed item, or returns `None` without blocking.
    pub fn try_dequeue(&self) -> Option<T>
    where
        T: Clone,
    {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            // SAFETY: `head` is never null and stays alive while pinned.
            let node = unsafe { head.deref() };

            let mut taken = None;
            if node.has_value.load(Ordering::Acquire)
                && node
                    .has_value
                    .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                debug_assert_taken_payload!(node.value.is_some());
                taken = node.value.clone();
            }

            let next = node.next.load(Ordering::Acquire, &guard);
            if !next.is_null() {
                // Opportunistic advance; only one thread wins, and the winner
                // retires the passed node.
                if self
                    .head
                    .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire, &guard)
                    .is_ok()
                {
                    // SAFETY: the passed node is unreachable to new loads;
                    // snapshots that already hold it stay pinned.
                    unsafe { guard.defer_destroy(head) };
                }
            }

            if taken.is_some() {
                return taken;
            }
            if next.is_null() {
                return None;
            }
        }
    }

    /// Returns true if no undequeued item is reachable right now.
    ///
    /// Like any size question on a concurrent queue, this is advisory only.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        // SAFETY: `head` is never null.
        let node = unsafe { head.deref() };
        !node.has_value.load(Ordering::Acquire)
            && node.next.load(Ordering::Acquire, &guard).is_null()
    }

    /// Iterates over a snapshot of the enqueued items.
    ///
    /// The head is sampled once at creation; the walk yields every node's
    /// payload whether or not a concurrent dequeuer has claimed it, so with
    /// no dequeuers running, every enqueued item appears exactly once. The
    /// walk starts at the sampled head: the head node may still carry an
    /// unclaimed payload, and the initial sentinel has none to yield.
    pub fn iter(&self) -> QueueIter<'_, T> {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        QueueIter {
            node: head.as_raw(),
            guard,
            _queue: PhantomData,
        }
    }
}

impl<T> Default for BufferedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for BufferedQueue<T> {
    fn drop(&mut self) {
        // SAFETY: exclusive access; the chain from head owns every remaining
        // node exactly once. Nodes passed by earlier head advances were
        // retired through guards and are freed by the collector.
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            while !node.is_null() {
                let owned = node.into_owned();
                node = owned.next.load(Ordering::Relaxed, guard);
            }
        }
    }
}

impl<'a, T: Clone> IntoIterator for &'a BufferedQueue<T> {
    type Item = T;
    type IntoIter = QueueIter<'a, T>;

    fn into_iter(self) -> QueueIter<'a, T> {
        self.iter()
    }
}

/// Snapshot iterator over a [`BufferedQueue`].
///
/// Pins the epoch for its whole lifetime: nodes retired by concurrent
/// dequeuers stay readable until the iterator is dropped.
pub struct QueueIter<'a, T> {
    node: *const Node<T>,
    guard: Guard,
    _queue: PhantomData<&'a BufferedQueue<T>>,
}

impl<T: Clone> Iterator for QueueIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while !self.node.is_null() {
            // SAFETY: the node was reachable when its pointer was loaded, and
            // the guard held by this iterator defers reclamation of the
            // snapshot chain.
            let node = unsafe { &*self.node };
            self.node = node.next.load(Ordering::Acquire, &self.guard).as_raw();
            if let Some(value) = &node.value {
                return Some(value.clone());
            }
        }
        None
    }
}
