//! Lock-free concurrent containers tuned for insertion under heavy
//! contention.
//!
//! Two independent structures:
//!
//! - [`GrowList`]: a grow-only indexed sequence. Concurrent append, indexed
//!   read, indexed overwrite (unconditional or compare-and-swap), membership
//!   queries, and snapshot iteration. No removal, ever.
//! - [`BufferedQueue`]: a multi-producer multi-consumer FIFO queue whose
//!   enqueue path absorbs contention on a temporary side chain instead of
//!   hammering one tail word.
//!
//! # Key Features
//!
//! - single fetch_add index claims; doubling growth that hands off
//!   slot-by-slot to in-flight appenders
//! - helping: any appender advances the published length past stalled peers
//! - side-chain enqueue buffering spliced back in one step
//! - epoch-based reclamation (crossbeam) for superseded arrays and passed
//!   nodes; iterators pin an epoch and stay valid across concurrent updates
//! - adaptive backoff (spin → yield → bounded sleep) in every wait loop
//!
//! # Example
//!
//! ```
//! use growqueue_rs::{BufferedQueue, GrowList};
//!
//! let list = GrowList::new();
//! let index = list.push(42u64).unwrap();
//! assert_eq!(list.get(index).unwrap(), 42);
//!
//! let queue = BufferedQueue::new();
//! queue.enqueue("job");
//! assert_eq!(queue.try_dequeue(), Some("job"));
//! assert_eq!(queue.try_dequeue(), None);
//! ```

mod backoff;
mod invariants;
mod list;
mod queue;

pub use backoff::Backoff;
pub use list::{GrowList, ListError, ListIter, MAX_CAPACITY};
pub use queue::{BufferedQueue, QueueIter};
