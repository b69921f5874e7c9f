//! A priority queue of sequences.
//!
//! The queue can only be accessed through a `Transaction`, which holds the
//! queue's lock for as long as it is alive. Several queues can share the same
//! lock (see `PriorityQueue::with_predecessor`), in which case at most one
//! transaction is open at a time across all of them, and a single transaction
//! can operate on any queue of the group.
//!
//! Pushing a sequence with `Transaction::push` owes a call to the queue's
//! wake-up callback. The calls are made when the transaction ends, after the
//! lock is released, so that the callback can take other locks or schedule
//! more work without risking a lock-order inversion.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;

use super::sequence::{Sequence, SequenceSortKey};
use super::sync::{Arc, AtomicBool, Mutex, MutexGuard, Ordering};

// Use std's atomic type explicitly here because loom's doesn't support static initialization.
static NEXT_LOCK_ID: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

/// Called once per pushed sequence, after the transaction that pushed it ends.
///
/// Typically wakes up a worker thread. If a callback panics, the wake-ups the
/// transaction still owed after it are not delivered.
pub trait WakeUp: Send + Sync {
    fn wake_up(&self);
}

impl<F> WakeUp for F where F: Fn() + Send + Sync + 'static {
    fn wake_up(&self) { self() }
}

/// A sequence along with the sort key it was inserted with.
///
/// Ordering and equality only consider the sort key.
pub struct SequenceAndSortKey {
    sequence: Arc<Sequence>,
    sort_key: SequenceSortKey,
}

impl SequenceAndSortKey {
    #[inline]
    pub fn sequence(&self) -> &Arc<Sequence> { &self.sequence }

    #[inline]
    pub fn sort_key(&self) -> &SequenceSortKey { &self.sort_key }
}

impl PartialEq for SequenceAndSortKey {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key == other.sort_key
    }
}

impl Eq for SequenceAndSortKey {}

impl Ord for SequenceAndSortKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.sort_key.cmp(&other.sort_key)
    }
}

impl PartialOrd for SequenceAndSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for SequenceAndSortKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SequenceAndSortKey")
            .field("sequence", &(&*self.sequence as *const Sequence))
            .field("sort_key", &self.sort_key)
            .finish()
    }
}

type Container = BinaryHeap<SequenceAndSortKey>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockId(u32);

/// The containers of a lock group, only accessible with the group's lock held.
struct Containers {
    heaps: Vec<Container>,
    // Slots of dropped queues, available for new queues of the group.
    free_slots: Vec<usize>,
}

/// The lock of a group of priority queues.
///
/// Each queue of the group owns a slot in `containers`. Locking the mutex gives
/// access to the containers of all queues in the group.
///
/// A dropped queue doesn't take the group lock (its thread may already hold it through
/// a transaction on another queue of the group). Instead it adds its slot to `released`,
/// and the next thread to take the group lock clears the slot.
struct SharedLock {
    containers: Mutex<Containers>,
    released: Mutex<Vec<usize>>,
    has_released: AtomicBool,
    id: LockId,
}

impl SharedLock {
    fn new() -> Self {
        SharedLock {
            containers: Mutex::new(Containers { heaps: Vec::new(), free_slots: Vec::new() }),
            released: Mutex::new(Vec::new()),
            has_released: AtomicBool::new(false),
            id: LockId(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Clears the slots of dropped queues and makes them available again.
    ///
    /// Must be called with the group lock held. The returned containers should be
    /// dropped after releasing the lock, since dropping a sequence drops its tasks.
    fn reclaim_released_slots(&self, containers: &mut Containers) -> Vec<Container> {
        if !self.has_released.swap(false, Ordering::Acquire) {
            return Vec::new();
        }

        let slots = match self.released.lock() {
            Ok(mut released) => std::mem::take(&mut *released),
            Err(_) => return Vec::new(),
        };

        let mut reclaimed = Vec::with_capacity(slots.len());
        for slot in slots {
            reclaimed.push(std::mem::take(&mut containers.heaps[slot]));
            containers.free_slots.push(slot);
        }

        reclaimed
    }
}

/// A priority queue of sequences, ordered by `SequenceSortKey`.
pub struct PriorityQueue {
    lock: Arc<SharedLock>,
    // Index of this queue's container in the shared lock.
    slot: usize,
    wake_up: Box<dyn WakeUp>,
    name: String,
}

impl PriorityQueue {
    pub fn builder() -> PriorityQueueBuilder {
        PriorityQueueBuilder {
            wake_up: None,
            predecessor: None,
            name: None,
        }
    }

    /// Creates a queue with its own lock.
    pub fn new<F>(wake_up: F) -> Self
    where F: WakeUp + 'static
    {
        PriorityQueue::builder()
            .with_wake_up(wake_up)
            .build()
    }

    /// Creates a queue that shares `predecessor`'s lock.
    ///
    /// Must not be called while a transaction is open on a queue of
    /// `predecessor`'s group on the same thread.
    pub fn with_predecessor<F>(wake_up: F, predecessor: &PriorityQueue) -> Self
    where F: WakeUp + 'static
    {
        PriorityQueue::builder()
            .with_wake_up(wake_up)
            .with_predecessor(predecessor)
            .build()
    }

    /// Acquires the lock of this queue's group.
    ///
    /// Blocks if a transaction is open on this queue or on any queue sharing its lock.
    ///
    /// Panics if the lock was poisoned by a panic in another transaction: such a panic
    /// means a contract violation, and the queues can't be trusted anymore.
    pub fn begin_transaction(&self) -> Transaction {
        profiling::scope!("PriorityQueue::begin_transaction");
        let mut containers = self.lock.containers.lock().unwrap();
        let reclaimed = self.lock.reclaim_released_slots(&mut containers);

        Transaction {
            target: self,
            containers: Some(containers),
            pending_wake_ups: Vec::new(),
            reclaimed,
            began_while_panicking: std::thread::panicking(),
        }
    }

    pub fn name(&self) -> &str { &self.name }

    /// The identifier of the lock this queue uses.
    pub fn lock_id(&self) -> LockId { self.lock.id }

    /// Whether `other` belongs to the same lock group as this queue.
    pub fn shares_lock_with(&self, other: &PriorityQueue) -> bool {
        self.lock.id == other.lock.id
    }
}

impl Drop for PriorityQueue {
    /// Doesn't take the group lock, so it is fine to drop a queue while a
    /// transaction is open on another queue of the group.
    ///
    /// The sequences of the queue are released the next time the group lock is
    /// taken, or when the last queue of the group is dropped.
    fn drop(&mut self) {
        if let Ok(mut released) = self.lock.released.lock() {
            released.push(self.slot);
        }
        self.lock.has_released.store(true, Ordering::Release);
    }
}

impl fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("name", &self.name)
            .field("lock", &self.lock.id)
            .field("slot", &self.slot)
            .finish()
    }
}

pub struct PriorityQueueBuilder {
    wake_up: Option<Box<dyn WakeUp>>,
    predecessor: Option<Arc<SharedLock>>,
    name: Option<String>,
}

impl PriorityQueueBuilder {
    /// Sets the callback invoked once per pushed sequence. Required.
    pub fn with_wake_up<F>(mut self, wake_up: F) -> Self
    where F: WakeUp + 'static
    {
        self.wake_up = Some(Box::new(wake_up));
        self
    }

    /// Makes the queue share `predecessor`'s lock instead of owning one.
    ///
    /// Sharing is transitive: all queues of a chain use the first queue's lock.
    pub fn with_predecessor(mut self, predecessor: &PriorityQueue) -> Self {
        self.predecessor = Some(Arc::clone(&predecessor.lock));
        self
    }

    /// A name for debugging and logging.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Panics if no wake-up callback was provided.
    ///
    /// Takes the group lock: must not be called while a transaction is open on a
    /// queue of the predecessor's group on the same thread.
    pub fn build(self) -> PriorityQueue {
        let wake_up = match self.wake_up {
            Some(wake_up) => wake_up,
            None => panic!("A priority queue requires a wake-up callback"),
        };

        let lock = match self.predecessor {
            Some(lock) => lock,
            None => Arc::new(SharedLock::new()),
        };

        let (slot, reclaimed) = {
            let mut containers = lock.containers.lock().unwrap();
            let reclaimed = lock.reclaim_released_slots(&mut containers);
            let slot = match containers.free_slots.pop() {
                Some(slot) => slot,
                None => {
                    containers.heaps.push(BinaryHeap::new());
                    containers.heaps.len() - 1
                }
            };

            (slot, reclaimed)
        };
        std::mem::drop(reclaimed);

        let name = match self.name {
            Some(name) => name,
            None => format!("PriorityQueue#{}.{}", lock.id.0, slot),
        };

        tracing::debug!(queue = %name, lock = lock.id.0, slot, "created priority queue");

        PriorityQueue { lock, slot, wake_up, name }
    }
}

/// Exclusive access to a group of priority queues sharing a lock.
///
/// Operations apply to the queue the transaction was started from, or the one
/// selected with `select`.
///
/// Ending the transaction (`end`, or dropping it) happens in two steps: the lock is
/// released, then the wake-up callbacks owed by `push` calls are invoked.
pub struct Transaction<'l> {
    target: &'l PriorityQueue,
    containers: Option<MutexGuard<'l, Containers>>,
    // Number of wake-ups owed to each queue touched by the transaction.
    pending_wake_ups: Vec<(&'l PriorityQueue, u32)>,
    // Contents of dropped queues, released after the lock.
    reclaimed: Vec<Container>,
    // A transaction opened during an unwind (for example from a drop guard) doesn't
    // poison the lock when it ends, so its wake-ups are still owed.
    began_while_panicking: bool,
}

impl<'l> Transaction<'l> {
    /// Directs subsequent operations to another queue of the same lock group.
    ///
    /// Panics if `queue` doesn't share this transaction's lock.
    pub fn select(&mut self, queue: &'l PriorityQueue) {
        assert!(
            self.target.shares_lock_with(queue),
            "{} does not share the lock of {}", queue.name, self.target.name,
        );
        self.target = queue;
    }

    /// The queue operations currently apply to.
    pub fn queue(&self) -> &'l PriorityQueue { self.target }

    /// Inserts a sequence and schedules a wake-up for when the transaction ends.
    pub fn push(&mut self, sequence: Arc<Sequence>, sort_key: SequenceSortKey) {
        self.push_no_wakeup(sequence, sort_key);

        let target = self.target;
        match self.pending_wake_ups.iter_mut().find(|(queue, _)| std::ptr::eq(*queue, target)) {
            Some((_, count)) => *count += 1,
            None => self.pending_wake_ups.push((target, 1)),
        }
    }

    /// Inserts a sequence without scheduling a wake-up.
    ///
    /// For callers that know a wake-up is already delivered through another path.
    pub fn push_no_wakeup(&mut self, sequence: Arc<Sequence>, sort_key: SequenceSortKey) {
        self.container_mut().push(SequenceAndSortKey { sequence, sort_key });
    }

    /// The sequence with the greatest sort key, or `None` if the queue is empty.
    ///
    /// This is the way to find out whether there is work: `None` is the empty
    /// sentinel. `is_empty` and `len` are conveniences answering from the same
    /// container, not a separate precondition for calling `peek`.
    pub fn peek(&self) -> Option<&SequenceAndSortKey> {
        self.container().peek()
    }

    /// Removes and returns the sequence with the greatest sort key.
    ///
    /// Panics if the queue is empty.
    pub fn pop(&mut self) -> Arc<Sequence> {
        match self.container_mut().pop() {
            Some(entry) => entry.sequence,
            None => panic!("pop called on an empty priority queue ({})", self.target.name),
        }
    }

    /// Number of sequences in the selected queue.
    pub fn len(&self) -> usize {
        self.container().len()
    }

    /// Same as `peek().is_none()`.
    pub fn is_empty(&self) -> bool {
        self.container().is_empty()
    }

    /// Ends the transaction and returns the number of wake-ups delivered.
    pub fn end(mut self) -> u32 {
        self.finish()
    }

    fn container(&self) -> &Container {
        match &self.containers {
            Some(containers) => &containers.heaps[self.target.slot],
            None => unreachable!(),
        }
    }

    fn container_mut(&mut self) -> &mut Container {
        match &mut self.containers {
            Some(containers) => &mut containers.heaps[self.target.slot],
            None => unreachable!(),
        }
    }

    fn finish(&mut self) -> u32 {
        // Release the lock first.
        match self.containers.take() {
            Some(containers) => std::mem::drop(containers),
            None => return 0,
        }
        std::mem::drop(std::mem::take(&mut self.reclaimed));

        // A panic that started during the transaction is a contract violation and
        // poisoned the lock, there is no point waking up workers to process the queues.
        if std::thread::panicking() && !self.began_while_panicking {
            return 0;
        }

        profiling::scope!("PriorityQueue::wake_up");
        let pending = std::mem::take(&mut self.pending_wake_ups);
        let mut total = 0;
        for (queue, count) in pending {
            for _ in 0..count {
                queue.wake_up.wake_up();
            }
            total += count;
        }

        tracing::trace!(queue = %self.target.name, wake_ups = total, "transaction ended");

        total
    }
}

impl<'l> Drop for Transaction<'l> {
    fn drop(&mut self) {
        self.finish();
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use crate::core::sync::{thread, AtomicU32};
    use crate::TaskPriority;
    use std::time::Instant;

    #[test]
    fn shared_lock_wake_ups() {
        loom::model(|| {
            let wake_ups = Arc::new(AtomicU32::new(0));

            let w = wake_ups.clone();
            let a = Arc::new(PriorityQueue::new(move || { w.fetch_add(1, Ordering::SeqCst); }));
            let w = wake_ups.clone();
            let b = Arc::new(PriorityQueue::with_predecessor(move || { w.fetch_add(1, Ordering::SeqCst); }, &a));

            let sort_key = SequenceSortKey::new(TaskPriority::UserVisible, Instant::now());

            let b2 = b.clone();
            let producer = thread::spawn(move || {
                let mut transaction = b2.begin_transaction();
                transaction.push(Arc::new(Sequence::new()), sort_key);
            });

            {
                let mut transaction = a.begin_transaction();
                transaction.push(Arc::new(Sequence::new()), sort_key);
                transaction.select(&b);
                let seen = transaction.len();
                assert!(seen <= 1);
            }

            producer.join().unwrap();

            assert_eq!(wake_ups.load(Ordering::SeqCst), 2);
            assert_eq!(a.begin_transaction().len(), 1);
            assert_eq!(b.begin_transaction().len(), 1);
        });
    }
}
