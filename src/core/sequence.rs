//! Sequences of tasks.
//!
//! A sequence is a run of tasks that execute one at a time, in the order they
//! were pushed, on whichever worker picks the sequence up. The priority queue
//! orders sequences rather than individual tasks, using the sort key of each
//! sequence's next task.

use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::time::Instant;

use super::sync::Mutex;
use super::task::Task;
use super::traits::TaskPriority;

/// The key used to order sequences in a priority queue.
///
/// A key is greater than another if its priority is higher, or if the priorities
/// are equal and its next task was sequenced earlier. The greatest key is served
/// first, which makes the queue approximately FIFO within a priority.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceSortKey {
    priority: TaskPriority,
    next_task_sequenced_time: Instant,
}

impl SequenceSortKey {
    pub fn new(priority: TaskPriority, next_task_sequenced_time: Instant) -> Self {
        SequenceSortKey { priority, next_task_sequenced_time }
    }

    #[inline]
    pub fn priority(&self) -> TaskPriority { self.priority }

    #[inline]
    pub fn next_task_sequenced_time(&self) -> Instant { self.next_task_sequenced_time }
}

impl Ord for SequenceSortKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority.cmp(&other.priority).then_with(|| {
            // Older work sorts first.
            other.next_task_sequenced_time.cmp(&self.next_task_sequenced_time)
        })
    }
}

impl PartialOrd for SequenceSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct SequenceState {
    queue: VecDeque<Task>,
    // Number of queued tasks per priority, so that the highest priority in the
    // sequence can be found without walking the queue.
    num_tasks_per_priority: [usize; TaskPriority::ALL.len()],
    // Whether a task was taken out with `take_task` and not yet accounted for
    // with `pop`.
    task_in_flight: bool,
}

/// A run of tasks that must execute in order, one at a time.
///
/// Sequences are shared between the priority queue and the worker running
/// them, so they are handed around as `Arc<Sequence>`. The sequence is
/// internally synchronized.
///
/// The protocol is:
/// - `push_task` returns true when the sequence must be (re)inserted in a
///   priority queue.
/// - A worker that popped the sequence from the priority queue calls
///   `take_task`, runs the task, then calls `pop`. If `pop` returns false, the
///   sequence still has work and the worker puts it back in a priority queue
///   with an updated `sort_key`.
pub struct Sequence {
    state: Mutex<SequenceState>,
}

impl Sequence {
    pub fn new() -> Self {
        Sequence {
            state: Mutex::new(SequenceState {
                queue: VecDeque::new(),
                num_tasks_per_priority: [0; TaskPriority::ALL.len()],
                task_in_flight: false,
            }),
        }
    }

    /// Adds a task at the end of the sequence and stamps its sequenced time.
    ///
    /// Returns true if the sequence was empty with no task in flight, in which
    /// case the caller is responsible for scheduling the sequence.
    pub fn push_task(&self, mut task: Task) -> bool {
        profiling::scope!("Sequence::push_task");
        assert!(task.sequenced_time.is_none(), "Task pushed into a sequence twice");
        task.sequenced_time = Some(Instant::now());

        let mut state = self.state.lock().unwrap();
        let was_idle = state.queue.is_empty() && !state.task_in_flight;
        state.num_tasks_per_priority[task.traits().priority().index()] += 1;
        state.queue.push_back(task);

        was_idle
    }

    /// Removes the next task for execution.
    ///
    /// Panics if the sequence has no queued task or if a task is already in
    /// flight.
    pub fn take_task(&self) -> Task {
        profiling::scope!("Sequence::take_task");
        let mut state = self.state.lock().unwrap();
        assert!(!state.task_in_flight, "A task of this sequence is already running");

        let task = match state.queue.pop_front() {
            Some(task) => task,
            None => panic!("take_task called on an empty sequence"),
        };

        let idx = task.traits().priority().index();
        debug_assert!(state.num_tasks_per_priority[idx] > 0);
        state.num_tasks_per_priority[idx] -= 1;
        state.task_in_flight = true;

        task
    }

    /// Marks the task returned by `take_task` as done.
    ///
    /// Returns true if the sequence is now empty, in which case it must not be
    /// put back in a priority queue.
    pub fn pop(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        assert!(state.task_in_flight, "pop called without a task in flight");
        state.task_in_flight = false;

        state.queue.is_empty()
    }

    /// Computes the sort key of the sequence from its queued tasks.
    ///
    /// The priority is the highest priority among the queued tasks, so that a
    /// high priority task isn't held back by lower priority tasks ahead of it.
    ///
    /// Panics if the sequence has no queued task.
    pub fn sort_key(&self) -> SequenceSortKey {
        let state = self.state.lock().unwrap();

        let next_task = match state.queue.front() {
            Some(task) => task,
            None => panic!("sort_key called on an empty sequence"),
        };

        let mut priority = TaskPriority::LOWEST;
        for p in TaskPriority::ALL.iter().rev() {
            if state.num_tasks_per_priority[p.index()] > 0 {
                priority = *p;
                break;
            }
        }

        // The time is set when the task is pushed, which all queued tasks went through.
        let sequenced_time = match next_task.sequenced_time {
            Some(time) => time,
            None => unreachable!(),
        };

        SequenceSortKey::new(priority, sequenced_time)
    }

    /// Number of queued tasks, not counting a task in flight.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::new()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::TaskTraits;
    use std::time::Duration;

    fn noop_task(priority: TaskPriority) -> Task {
        Task::new(TaskTraits::new().with_priority(priority), || {})
    }

    #[test]
    fn sort_key_order() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1);

        let bg_0 = SequenceSortKey::new(TaskPriority::Background, t0);
        let bg_1 = SequenceSortKey::new(TaskPriority::Background, t1);
        let uv_1 = SequenceSortKey::new(TaskPriority::UserVisible, t1);
        let ub_0 = SequenceSortKey::new(TaskPriority::UserBlocking, t0);
        let ub_1 = SequenceSortKey::new(TaskPriority::UserBlocking, t1);

        // Priority dominates.
        assert!(uv_1 > bg_0);
        assert!(ub_1 > uv_1);
        // Within a priority, earlier work is greater.
        assert!(bg_0 > bg_1);
        assert!(ub_0 > ub_1);
        assert_eq!(ub_0.cmp(&ub_0), CmpOrdering::Equal);

        let mut keys = vec![bg_1, ub_1, bg_0, uv_1, ub_0];
        keys.sort_by(|a, b| b.cmp(a));
        assert_eq!(keys, vec![ub_0, ub_1, uv_1, bg_0, bg_1]);
    }

    #[test]
    fn push_take_pop() {
        let sequence = Sequence::new();
        assert!(sequence.is_empty());

        assert!(sequence.push_task(noop_task(TaskPriority::Background)));
        assert!(!sequence.push_task(noop_task(TaskPriority::UserBlocking)));
        assert_eq!(sequence.len(), 2);

        let first = sequence.take_task();
        assert_eq!(first.traits().priority(), TaskPriority::Background);
        assert!(first.sequenced_time().is_some());

        // A task is in flight, so pushing doesn't ask for the sequence to be scheduled.
        assert!(!sequence.push_task(noop_task(TaskPriority::Background)));
        first.run();
        assert!(!sequence.pop());

        let second = sequence.take_task();
        assert_eq!(second.traits().priority(), TaskPriority::UserBlocking);
        second.run();
        assert!(!sequence.pop());

        sequence.take_task().run();
        assert!(sequence.pop());
        assert!(sequence.is_empty());

        // Empty again with nothing in flight.
        assert!(sequence.push_task(noop_task(TaskPriority::Background)));
    }

    #[test]
    fn in_flight_task_blocks_rescheduling() {
        let sequence = Sequence::new();
        assert!(sequence.push_task(noop_task(TaskPriority::UserVisible)));

        let task = sequence.take_task();
        assert!(sequence.is_empty());
        assert!(!sequence.push_task(noop_task(TaskPriority::UserVisible)));
        task.run();
        assert!(!sequence.pop());
    }

    #[test]
    fn sequence_sort_key() {
        let sequence = Sequence::new();
        sequence.push_task(noop_task(TaskPriority::Background));
        sequence.push_task(noop_task(TaskPriority::UserBlocking));
        sequence.push_task(noop_task(TaskPriority::UserVisible));

        let key = sequence.sort_key();
        assert_eq!(key.priority(), TaskPriority::UserBlocking);
        let first_time = key.next_task_sequenced_time();

        sequence.take_task();
        sequence.pop();
        let key = sequence.sort_key();
        assert_eq!(key.priority(), TaskPriority::UserBlocking);
        assert!(key.next_task_sequenced_time() >= first_time);

        sequence.take_task();
        sequence.pop();
        assert_eq!(sequence.sort_key().priority(), TaskPriority::UserVisible);
    }

    #[test]
    #[should_panic]
    fn take_from_empty_sequence() {
        Sequence::new().take_task();
    }

    #[test]
    #[should_panic]
    fn sort_key_of_empty_sequence() {
        Sequence::new().sort_key();
    }

    #[test]
    #[should_panic]
    fn push_task_twice() {
        let a = Sequence::new();
        let b = Sequence::new();
        a.push_task(noop_task(TaskPriority::Background));
        let task = a.take_task();
        b.push_task(task);
    }
}
