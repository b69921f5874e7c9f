use std::fmt;
use std::panic::Location;
use std::time::Instant;

use super::traits::TaskTraits;

/// A unit of work that can be scheduled.
///
/// A task is owned by its `Sequence` until a worker takes it out to run it.
/// Running the task consumes it.
pub struct Task {
    posted_from: &'static Location<'static>,
    post_time: Instant,
    work: Box<dyn FnOnce() + Send>,
    traits: TaskTraits,
    /// Set exactly once, when the task is pushed into a sequence.
    pub(crate) sequenced_time: Option<Instant>,
}

impl Task {
    /// Creates a task, recording the caller's location as the posting location.
    #[track_caller]
    pub fn new<F>(traits: TaskTraits, work: F) -> Self
    where F: FnOnce() + Send + 'static
    {
        Task {
            posted_from: Location::caller(),
            post_time: Instant::now(),
            work: Box::new(work),
            traits,
            sequenced_time: None,
        }
    }

    #[inline]
    pub fn traits(&self) -> &TaskTraits { &self.traits }

    /// Where in the source code the task was created.
    #[inline]
    pub fn posted_from(&self) -> &'static Location<'static> { self.posted_from }

    #[inline]
    pub fn post_time(&self) -> Instant { self.post_time }

    /// The time at which the task was inserted into its sequence, or `None` if it
    /// wasn't yet.
    #[inline]
    pub fn sequenced_time(&self) -> Option<Instant> { self.sequenced_time }

    /// Runs the work item.
    pub fn run(self) {
        profiling::scope!("run task");
        (self.work)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Task")
            .field("posted_from", &self.posted_from)
            .field("traits", &self.traits)
            .field("sequenced_time", &self.sequenced_time)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn task_metadata() {
        use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
        use crate::TaskPriority;

        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let line = line!() + 1;
        let task = Task::new(TaskTraits::new().with_priority(TaskPriority::UserVisible), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(task.posted_from().file(), file!());
        assert_eq!(task.posted_from().line(), line);
        assert_eq!(task.traits().priority(), TaskPriority::UserVisible);
        assert!(task.sequenced_time().is_none());
        assert!(task.post_time() <= Instant::now());

        task.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
