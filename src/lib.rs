//! The ordering core of a multithreaded task scheduler.
//!
//! Tasks are posted with `TaskTraits` describing how they should be scheduled,
//! pushed into `Sequence`s (runs of tasks that execute in order), and the
//! sequences are handed to worker threads through a `PriorityQueue`.
//!
//! What we want:
//! - Higher priority work is picked first, and within a priority, older work is
//!   picked first.
//! - Several priority queues (for example one per group of workers) can share a
//!   lock, so that moving work between them is atomic without juggling locks.
//! - Waking workers up never happens while a queue's lock is held.
//!
//! ```
//! use taskline::{PriorityQueue, Sequence, Task, TaskTraits, TaskPriority};
//! use taskline::sync::Arc;
//!
//! let queue = PriorityQueue::new(|| { /* wake a worker up */ });
//!
//! let sequence = Arc::new(Sequence::new());
//! let task = Task::new(TaskTraits::new().with_priority(TaskPriority::UserVisible), || {});
//! if sequence.push_task(task) {
//!     let mut transaction = queue.begin_transaction();
//!     transaction.push(sequence.clone(), sequence.sort_key());
//! }
//!
//! // On a worker thread.
//! let sequence = queue.begin_transaction().pop();
//! sequence.take_task().run();
//! assert!(sequence.pop());
//! ```

mod core;

pub use crate::core::traits::{TaskTraits, TaskPriority, ShutdownBehavior};
pub use crate::core::task::Task;
pub use crate::core::sequence::{Sequence, SequenceSortKey};
pub use crate::core::priority_queue::{
    PriorityQueue, PriorityQueueBuilder, Transaction, SequenceAndSortKey, WakeUp, LockId,
};
pub use crate::core::sync;
