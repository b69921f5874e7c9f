use std::fmt;

/// The priority of a task.
///
/// Priorities are ordered: `Background < UserVisible < UserBlocking`. A sequence
/// whose next task has a higher priority is handed to workers first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Work the user won't notice if it takes an arbitrarily long time.
    Background,
    /// Work that affects something the user can see, but not what they are
    /// currently waiting on.
    UserVisible,
    /// Work that blocks the user's interaction with the program.
    UserBlocking,
}

impl TaskPriority {
    pub const LOWEST: TaskPriority = TaskPriority::Background;
    pub const HIGHEST: TaskPriority = TaskPriority::UserBlocking;

    /// All priorities, from lowest to highest.
    pub const ALL: [TaskPriority; 3] = [
        TaskPriority::Background,
        TaskPriority::UserVisible,
        TaskPriority::UserBlocking,
    ];

    // For convenience, some per-priority data (like task counts) are internally
    // stored in arrays.
    pub(crate) fn index(&self) -> usize {
        match self {
            TaskPriority::Background => 0,
            TaskPriority::UserVisible => 1,
            TaskPriority::UserBlocking => 2,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TaskPriority::Background => "Background",
            TaskPriority::UserVisible => "UserVisible",
            TaskPriority::UserBlocking => "UserBlocking",
        })
    }
}

/// What happens to a task when the scheduler shuts down.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShutdownBehavior {
    /// The task may still be running when shutdown completes. Tasks that haven't
    /// started are never started after shutdown begins.
    ContinueOnShutdown,
    /// Tasks that haven't started when shutdown begins are skipped, but tasks
    /// that already started block shutdown until they are done.
    SkipOnShutdown,
    /// Shutdown waits for the task to run, even if it wasn't started yet.
    BlockShutdown,
}

impl fmt::Display for ShutdownBehavior {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ShutdownBehavior::ContinueOnShutdown => "ContinueOnShutdown",
            ShutdownBehavior::SkipOnShutdown => "SkipOnShutdown",
            ShutdownBehavior::BlockShutdown => "BlockShutdown",
        })
    }
}

/// Scheduling-relevant properties of a task.
///
/// The default value is subject to change. Code whose correctness depends on a
/// particular trait must set it explicitly:
///
/// ```
/// use taskline::{TaskTraits, TaskPriority, ShutdownBehavior};
///
/// let traits = TaskTraits::default()
///     .with_priority(TaskPriority::UserBlocking)
///     .with_shutdown_behavior(ShutdownBehavior::BlockShutdown);
///
/// assert_eq!(traits.priority(), TaskPriority::UserBlocking);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskTraits {
    file_io: bool,
    priority: TaskPriority,
    shutdown_behavior: ShutdownBehavior,
}

impl TaskTraits {
    /// Currently: no file I/O, `Background` priority, `SkipOnShutdown`.
    pub const fn new() -> Self {
        TaskTraits {
            file_io: false,
            priority: TaskPriority::Background,
            shutdown_behavior: ShutdownBehavior::SkipOnShutdown,
        }
    }

    /// Allows the task to block on file I/O.
    #[inline]
    pub const fn with_file_io(mut self) -> Self {
        self.file_io = true;
        self
    }

    #[inline]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    pub const fn with_shutdown_behavior(mut self, behavior: ShutdownBehavior) -> Self {
        self.shutdown_behavior = behavior;
        self
    }

    /// Whether the task may block on file I/O.
    #[inline]
    pub const fn file_io(&self) -> bool { self.file_io }

    #[inline]
    pub const fn priority(&self) -> TaskPriority { self.priority }

    #[inline]
    pub const fn shutdown_behavior(&self) -> ShutdownBehavior { self.shutdown_behavior }
}

impl Default for TaskTraits {
    fn default() -> Self {
        TaskTraits::new()
    }
}

impl fmt::Display for TaskTraits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "priority: {}, shutdown: {}, file io: {}",
            self.priority, self.shutdown_behavior, self.file_io,
        )
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        assert!(TaskPriority::Background < TaskPriority::UserVisible);
        assert!(TaskPriority::UserVisible < TaskPriority::UserBlocking);
        assert_eq!(TaskPriority::LOWEST, TaskPriority::ALL[0]);
        assert_eq!(TaskPriority::HIGHEST, TaskPriority::ALL[2]);

        for (i, priority) in TaskPriority::ALL.iter().enumerate() {
            assert_eq!(priority.index(), i);
        }
    }

    #[test]
    fn traits_builder() {
        let default = TaskTraits::default();
        assert!(!default.file_io());
        assert_eq!(default.priority(), TaskPriority::Background);
        assert_eq!(default.shutdown_behavior(), ShutdownBehavior::SkipOnShutdown);

        let traits = default
            .with_file_io()
            .with_priority(TaskPriority::UserVisible)
            .with_shutdown_behavior(ShutdownBehavior::ContinueOnShutdown);

        assert!(traits.file_io());
        assert_eq!(traits.priority(), TaskPriority::UserVisible);
        assert_eq!(traits.shutdown_behavior(), ShutdownBehavior::ContinueOnShutdown);

        // The original value is untouched.
        assert_eq!(default, TaskTraits::new());
    }

    #[test]
    fn traits_display() {
        let traits = TaskTraits::new().with_priority(TaskPriority::UserBlocking);
        assert_eq!(
            traits.to_string(),
            "priority: UserBlocking, shutdown: SkipOnShutdown, file io: false",
        );
    }
}
