use crate::invariants::{
    debug_assert_advance_claimed, debug_assert_capacity_order, debug_assert_prefix_bounded,
    debug_assert_slot_populated,
};
use crate::Backoff;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The list is a pair of published arrays (value slots and occupancy flags)
// plus three monotonic counters:
//
// - `next_index`: claim counter, incremented BEFORE the slot is populated.
//   A fetch_add hands every appender a distinct index.
// - `theoretical_capacity`: the capacity after all in-flight growths finish.
//   Raised by CAS; the winner of that CAS is the exclusive grower.
// - `fully_added`: length of the contiguous populated prefix. This is the
//   published length; readers never index past it.
//
// ## Append path
//
// 1. fetch_add `next_index` (SeqCst) to claim index i
// 2. Ensure i is inside the published arrays (growth protocol below)
// 3. Store the value into slot i (Release), then flip flag i (Release)
// 4. CAS `fully_added` from i to i+1 (AcqRel) and keep helping forward
//    while the next slot is claimed and flagged
//
// A reader that observes `fully_added ≥ i+1` (Acquire) therefore observes
// the flag store, which observes the value store. Gaps left by stalled
// appenders are closed by whichever later appender lands on the boundary.
//
// ## Growth path
//
// The winner of the `theoretical_capacity` CAS allocates both replacement
// arrays and copies slot-by-slot, spinning per slot until the source flag is
// set. Every index below the old capacity is claimed once growth is
// triggered, so each spin terminates when its appender finishes.
//
// Publication order is flags first, values second; appenders and the prefix
// advance load values first, flags second. Observing a value array of some
// generation therefore guarantees a flag array of the same generation or
// newer, and the per-slot copy wait guarantees it is never newer for a slot
// still being populated: replacement arrays cannot be published before every
// old-range flag is set.
//
// ## Reclamation
//
// Superseded arrays, and values displaced by `set`/`compare_and_swap`, are
// retired through an epoch guard. Growth copies values by `Clone`, so each
// array generation uniquely owns its elements and retirement of one
// generation never touches another's.
//
// =============================================================================

/// Hard capacity ceiling: the maximum sequence index is `2^31 - 1`.
pub const MAX_CAPACITY: usize = i32::MAX as usize;

/// Error types for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ListError {
    /// Growth was requested while the capacity already sits at the ceiling.
    #[error("capacity exhausted (2^31 - 1 slots is the maximum)")]
    CapacityExhausted,
    /// Index at or past the published length.
    #[error("index {index} out of bounds (len: {len})")]
    OutOfBounds {
        /// The requested index.
        index: usize,
        /// The published length at the time of the call.
        len: usize,
    },
    /// Range start past its end.
    #[error("invalid range: from {from} > to {to}")]
    InvalidRange {
        /// Requested start index (inclusive).
        from: usize,
        /// Requested end index (inclusive).
        to: usize,
    },
    /// The list is grow-only; removal, insertion and clearing are rejected.
    #[error("unsupported mutation: {0} (the list is grow-only)")]
    Unsupported(&'static str),
}

/// A grow-only indexed sequence with lock-free concurrent append.
///
/// Optimized for insertion under heavy contention:
/// - appends claim distinct indices with a single fetch_add
/// - capacity doubles in place; growth hands off slot-by-slot to in-flight
///   appenders instead of blocking them behind a lock
/// - a helping scheme advances the published length past stalled peers
///
/// Elements are handle-shaped: each slot holds one boxed value, and reads
/// hand out clones. Indexed overwrite is permitted only below the published
/// length; nothing is ever removed.
pub struct GrowList<T> {
    /// Published value slots; the array length is the actual capacity.
    values: Atomic<ValueSlots<T>>,
    /// Published occupancy flags, one per slot, same generation as `values`.
    flags: Atomic<FlagSlots>,
    /// Capacity after all in-flight growths complete. Monotonic.
    theoretical_capacity: CachePadded<AtomicUsize>,
    /// Next unclaimed append index. Incremented before the slot is populated.
    next_index: CachePadded<AtomicUsize>,
    /// Length of the contiguous populated-and-visible prefix.
    fully_added: CachePadded<AtomicUsize>,
}

struct ValueSlots<T> {
    cells: Box<[Atomic<T>]>,
}

struct FlagSlots {
    cells: Box<[AtomicBool]>,
}

impl<T> ValueSlots<T> {
    fn empty(capacity: usize) -> Self {
        let mut cells = Vec::with_capacity(capacity);
        cells.resize_with(capacity, Atomic::null);
        Self {
            cells: cells.into_boxed_slice(),
        }
    }
}

impl FlagSlots {
    fn cleared(capacity: usize) -> Self {
        let mut cells = Vec::with_capacity(capacity);
        cells.resize_with(capacity, || AtomicBool::new(false));
        Self {
            cells: cells.into_boxed_slice(),
        }
    }
}

impl<T> Drop for ValueSlots<T> {
    fn drop(&mut self) {
        // SAFETY: an array generation is dropped either directly by the list
        // (exclusive access) or through epoch deferral once no reader can
        // reach it. Each generation owns its values exclusively, so freeing
        // every populated slot here frees each value exactly once.
        unsafe {
            let guard = epoch::unprotected();
            for cell in &*self.cells {
                let slot = cell.load(Ordering::Relaxed, guard);
                if !slot.is_null() {
                    drop(slot.into_owned());
                }
            }
        }
    }
}

impl<T> GrowList<T> {
    /// Capacity used by [`GrowList::new`].
    pub const DEFAULT_CAPACITY: usize = 16;

    /// Creates an empty list with the default initial capacity (16).
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates an empty list with the given initial capacity.
    ///
    /// Capacities above the `2^31 - 1` ceiling are clamped to it.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CAPACITY);
        Self {
            values: Atomic::new(ValueSlots::empty(capacity)),
            flags: Atomic::new(FlagSlots::cleared(capacity)),
            theoretical_capacity: CachePadded::new(AtomicUsize::new(capacity)),
            next_index: CachePadded::new(AtomicUsize::new(0)),
            fully_added: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the published length: the contiguous populated prefix.
    ///
    /// Appends that have claimed an index but not yet become visible are not
    /// counted.
    #[inline]
    pub fn len(&self) -> usize {
        self.fully_added.load(Ordering::Acquire)
    }

    /// Returns true if no element is visible yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current slot-array capacity.
    pub fn capacity(&self) -> usize {
        let guard = epoch::pin();
        self.current_capacity(&guard)
    }

    fn current_capacity(&self, guard: &Guard) -> usize {
        // SAFETY: the published array is never null.
        unsafe { self.values.load(Ordering::Acquire, guard).deref() }
            .cells
            .len()
    }

    /// Rejected: the list is grow-only.
    pub fn remove(&self, _value: &T) -> Result<bool, ListError> {
        Err(ListError::Unsupported("remove"))
    }

    /// Rejected: the list is grow-only. The item is dropped.
    pub fn insert(&self, _index: usize, _value: T) -> Result<(), ListError> {
        Err(ListError::Unsupported("insert"))
    }

    /// Rejected: the list is grow-only.
    pub fn clear(&self) -> Result<(), ListError> {
        Err(ListError::Unsupported("clear"))
    }
}

impl<T: Clone> GrowList<T> {
    /// Appends an item, returning the index it was assigned.
    ///
    /// Claims the next index with a single fetch_add, grows the arrays if the
    /// claim landed past them, publishes the slot, and advances the visible
    /// prefix as far as consecutively populated slots permit.
    ///
    /// Fails with [`ListError::CapacityExhausted`] only when the capacity
    /// already sits at `2^31 - 1` and cannot double again.
    pub fn push(&self, item: T) -> Result<usize, ListError> {
        let guard = epoch::pin();
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.ensure_capacity(index, &guard)?;

        debug_assert_capacity_order!(
            self.theoretical_capacity.load(Ordering::SeqCst),
            self.current_capacity(&guard)
        );

        // Values first, flags second. Publication goes the other way around
        // (flags first), so the flag array seen here is of the same
        // generation as the value array: a growth over this slot's range
        // cannot publish before this very flag store happens.
        let values = self.values.load(Ordering::Acquire, &guard);
        let flags = self.flags.load(Ordering::Acquire, &guard);
        // SAFETY: published arrays are never null, and `ensure_capacity`
        // returned only once the value array covers `index`.
        let (values_ref, flags_ref) = unsafe { (values.deref(), flags.deref()) };
        values_ref.cells[index].store(Owned::new(item), Ordering::Release);
        flags_ref.cells[index].store(true, Ordering::Release);

        self.advance_fully_added(index, &guard);

        debug_assert_prefix_bounded!(
            self.fully_added.load(Ordering::Acquire),
            self.current_capacity(&guard)
        );
        Ok(index)
    }

    /// Appends an item, discarding the assigned index.
    #[inline]
    pub fn push_value(&self, item: T) -> Result<(), ListError> {
        self.push(item).map(|_| ())
    }

    /// Makes sure the published arrays cover `index`, growing if needed.
    fn ensure_capacity(&self, index: usize, guard: &Guard) -> Result<(), ListError> {
        loop {
            let theoretical = self.theoretical_capacity.load(Ordering::SeqCst);
            if index < theoretical {
                // Another grower is (or has been) responsible for this range;
                // wait for the published array to catch up.
                let mut backoff = Backoff::new();
                while self.current_capacity(guard) <= index {
                    backoff.snooze();
                }
                return Ok(());
            }

            // Wait out any in-flight growth before bidding for the next one.
            let mut backoff = Backoff::new();
            while self.current_capacity(guard) < theoretical {
                backoff.snooze();
            }
            if self.theoretical_capacity.load(Ordering::SeqCst) != theoretical {
                continue;
            }
            if theoretical >= MAX_CAPACITY {
                return Err(ListError::CapacityExhausted);
            }

            let target = (theoretical * 2).clamp(1, MAX_CAPACITY);
            if self
                .theoretical_capacity
                .compare_exchange(theoretical, target, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.grow_into(target, guard);
            }
            // Lost the bid, or the claim sits past even the new range: retry.
        }
    }

    /// Allocates and publishes arrays of `new_capacity` slots.
    ///
    /// Runs exclusively: the theoretical-capacity CAS admits one grower at a
    /// time, and every later bidder waits until the published length catches
    /// up before trying again.
    fn grow_into(&self, new_capacity: usize, guard: &Guard) {
        let old_values = self.values.load(Ordering::Acquire, guard);
        let old_flags = self.flags.load(Ordering::Acquire, guard);
        // SAFETY: published arrays are never null and stay alive while pinned.
        let (old_values_ref, old_flags_ref) = unsafe { (old_values.deref(), old_flags.deref()) };
        let old_capacity = old_values_ref.cells.len();

        let mut values = Vec::with_capacity(new_capacity);
        let mut flags = Vec::with_capacity(new_capacity);
        for j in 0..old_capacity {
            // Every index below the old capacity is claimed once growth is
            // triggered, so each flag eventually flips.
            let mut backoff = Backoff::new();
            while !old_flags_ref.cells[j].load(Ordering::Acquire) {
                backoff.snooze();
            }
            let slot = old_values_ref.cells[j].load(Ordering::Acquire, guard);
            // SAFETY: the flag is set only after the slot is populated.
            let item = unsafe { slot.deref() }.clone();
            values.push(Atomic::new(item));
            flags.push(AtomicBool::new(true));
        }
        values.resize_with(new_capacity, Atomic::null);
        flags.resize_with(new_capacity, || AtomicBool::new(false));

        // Flags first, values second; see the strategy comment at the top.
        let retired_flags = self.flags.swap(
            Owned::new(FlagSlots {
                cells: flags.into_boxed_slice(),
            }),
            Ordering::AcqRel,
            guard,
        );
        let retired_values = self.values.swap(
            Owned::new(ValueSlots {
                cells: values.into_boxed_slice(),
            }),
            Ordering::AcqRel,
            guard,
        );
        // SAFETY: the superseded arrays are unreachable to new loads; readers
        // that already hold them stay pinned, so destruction is deferred.
        unsafe {
            guard.defer_destroy(retired_flags);
            guard.defer_destroy(retired_values);
        }
    }

    /// Advances the visible prefix past `index` and keeps helping forward.
    ///
    /// Advancement is gated on the next slot being both claimed and flagged,
    /// so the counter never passes a slot no appender owns. A gap left by a
    /// stalled appender is closed by that appender itself or by whichever
    /// later appender lands on the boundary once the gap fills.
    fn advance_fully_added(&self, index: usize, guard: &Guard) {
        if self
            .fully_added
            .compare_exchange(index, index + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let mut k = index + 1;
        loop {
            let claimed = self.next_index.load(Ordering::Acquire);
            let values = self.values.load(Ordering::Acquire, guard);
            let flags = self.flags.load(Ordering::Acquire, guard);
            // SAFETY: published arrays are never null; the flag array loaded
            // after the value array is of the same generation or newer, so
            // its length is at least `capacity`.
            let capacity = unsafe { values.deref() }.cells.len();
            let flags_ref = unsafe { flags.deref() };
            if k >= claimed || k >= capacity || !flags_ref.cells[k].load(Ordering::Acquire) {
                return;
            }
            debug_assert_advance_claimed!(k, claimed);
            if self
                .fully_added
                .compare_exchange(k, k + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            k += 1;
        }
    }

    /// Returns a clone of the element at `index`.
    ///
    /// Fails with [`ListError::OutOfBounds`] when `index` is at or past the
    /// published length.
    pub fn get(&self, index: usize) -> Result<T, ListError> {
        let len = self.len();
        if index >= len {
            return Err(ListError::OutOfBounds { index, len });
        }
        let guard = epoch::pin();
        Ok(self.read_slot(index, &guard))
    }

    fn read_slot(&self, index: usize, guard: &Guard) -> T {
        let values = self.values.load(Ordering::Acquire, guard);
        // SAFETY: the published array is never null and its length is at
        // least any previously observed published length.
        let slot = unsafe { values.deref() }.cells[index].load(Ordering::Acquire, guard);
        debug_assert_slot_populated!(!slot.is_null(), index);
        // SAFETY: slots below the published length are populated (the flag
        // store and prefix advance pair with the caller's acquire load), and
        // the pin keeps a concurrently displaced value alive for the clone.
        unsafe { slot.deref() }.clone()
    }

    /// Overwrites the element at `index`. Allowed only below the published
    /// length; the displaced value is retired through the epoch.
    pub fn set(&self, index: usize, value: T) -> Result<(), ListError> {
        let len = self.len();
        if index >= len {
            return Err(ListError::OutOfBounds { index, len });
        }
        let guard = epoch::pin();
        let values = self.values.load(Ordering::Acquire, &guard);
        // SAFETY: published array is never null; `index` is below the
        // published length and therefore within it.
        let cells = &unsafe { values.deref() }.cells;
        let displaced = cells[index].swap(Owned::new(value), Ordering::AcqRel, &guard);
        // SAFETY: the displaced value is unreachable to new loads; pinned
        // readers are covered by the deferral.
        unsafe { guard.defer_destroy(displaced) };
        Ok(())
    }

    /// Compares the element at `index` against `expected` and, on a match,
    /// swaps in `new`. Returns the previous value either way: the swap took
    /// effect exactly when the returned value equals `expected`.
    pub fn compare_and_swap(&self, index: usize, new: T, expected: &T) -> Result<T, ListError>
    where
        T: PartialEq,
    {
        let len = self.len();
        if index >= len {
            return Err(ListError::OutOfBounds { index, len });
        }
        let guard = epoch::pin();
        let values = self.values.load(Ordering::Acquire, &guard);
        // SAFETY: as in `set`.
        let cells = &unsafe { values.deref() }.cells;
        let mut replacement = Owned::new(new);
        loop {
            let current = cells[index].load(Ordering::Acquire, &guard);
            // SAFETY: fully-added slots are populated.
            let current_ref = unsafe { current.deref() };
            if current_ref != expected {
                return Ok(current_ref.clone());
            }
            match cells[index].compare_exchange(
                current,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    let previous = current_ref.clone();
                    // SAFETY: displaced value, as in `set`.
                    unsafe { guard.defer_destroy(current) };
                    return Ok(previous);
                }
                // The slot changed under us; take the allocation back and
                // compare against the fresh value.
                Err(err) => replacement = err.new,
            }
        }
    }

    /// Returns the index of the first element equal to `value`.
    ///
    /// The length and the slot array are sampled once; the scan does not
    /// observe appends that land after it starts.
    pub fn index_of(&self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        let len = self.len();
        let guard = epoch::pin();
        let values = self.values.load(Ordering::Acquire, &guard);
        // SAFETY: published array is never null; its length covers `len`.
        let cells = &unsafe { values.deref() }.cells;
        (0..len).find(|&i| {
            let slot = cells[i].load(Ordering::Acquire, &guard);
            // SAFETY: slots below the published length are populated.
            (unsafe { slot.deref() }) == value
        })
    }

    /// Returns true if some element equals `value`.
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.index_of(value).is_some()
    }

    /// Clones the visible prefix into `dst` starting at `offset`.
    ///
    /// Returns the number of elements copied. Fails when the destination
    /// cannot hold the published length at `offset`.
    pub fn copy_to(&self, dst: &mut [T], offset: usize) -> Result<usize, ListError> {
        let len = self.len();
        if offset > dst.len() || dst.len() - offset < len {
            return Err(ListError::OutOfBounds {
                index: offset,
                len: dst.len(),
            });
        }
        let guard = epoch::pin();
        for i in 0..len {
            dst[offset + i] = self.read_slot(i, &guard);
        }
        Ok(len)
    }

    /// Iterates over the visible prefix.
    ///
    /// The length is sampled once at creation; appends and growth after that
    /// are not observed.
    pub fn iter(&self) -> ListIter<'_, T> {
        self.make_iter(0, usize::MAX)
    }

    /// Iterates over indices `from..=to`, clamped to the visible prefix.
    ///
    /// Fails with [`ListError::InvalidRange`] when `from > to`.
    pub fn range(&self, from: usize, to: usize) -> Result<ListIter<'_, T>, ListError> {
        if from > to {
            return Err(ListError::InvalidRange { from, to });
        }
        Ok(self.make_iter(from, to))
    }

    fn make_iter(&self, from: usize, to: usize) -> ListIter<'_, T> {
        let len = self.len();
        let end = to.saturating_add(1).min(len);
        ListIter {
            list: self,
            guard: epoch::pin(),
            index: from,
            end,
        }
    }
}

impl<T> Default for GrowList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for GrowList<T> {
    fn drop(&mut self) {
        // SAFETY: exclusive access; nothing else can load these arrays, so
        // they can be dropped in place. Superseded generations were retired
        // through guards and are freed by the collector independently.
        unsafe {
            let guard = epoch::unprotected();
            let values = self.values.load(Ordering::Relaxed, guard);
            if !values.is_null() {
                drop(values.into_owned());
            }
            let flags = self.flags.load(Ordering::Relaxed, guard);
            if !flags.is_null() {
                drop(flags.into_owned());
            }
        }
    }
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for GrowList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, T: Clone> IntoIterator for &'a GrowList<T> {
    type Item = T;
    type IntoIter = ListIter<'a, T>;

    fn into_iter(self) -> ListIter<'a, T> {
        self.iter()
    }
}

/// Snapshot iterator over a [`GrowList`].
///
/// Holds an epoch guard for its whole lifetime, so displaced values stay
/// readable until the iterator is dropped.
pub struct ListIter<'a, T> {
    list: &'a GrowList<T>,
    guard: Guard,
    index: usize,
    end: usize,
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for ListIter<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListIter")
            .field("list", &self.list)
            .field("index", &self.index)
            .field("end", &self.end)
            .finish()
    }
}

impl<T: Clone> Iterator for ListIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.index >= self.end {
            return None;
        }
        let item = self.list.read_slot(self.index, &self.guard);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}
