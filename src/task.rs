//! Task types shared by the queues and the scheduler.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::BoxError;

/// Unique identifier for a scheduled task.
///
/// Periodic tasks keep the same id for every firing, so it can be used to
/// cancel them from inside their own callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocates a new unique task ID.
    ///
    /// Custom [`AsyncPrimitives`](crate::AsyncPrimitives) implementations use
    /// this to identify the work they accept.
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Which queue a task lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// A delayed callback with a due time.
    Macro,
    /// An immediate continuation.
    Micro,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Macro => write!(f, "macrotask"),
            TaskKind::Micro => write!(f, "microtask"),
        }
    }
}

/// The value a scheduled callback may return.
///
/// Implemented for `()` and for `Result<(), E>`, so both plain and fallible
/// closures can be scheduled. An `Err` stops the drain and is returned to the
/// caller of `tick`/`flush` as [`Error::CallbackFailed`](crate::Error::CallbackFailed).
pub trait TaskOutcome {
    /// Converts the callback's return value.
    ///
    /// # Errors
    ///
    /// Returns the callback's own error.
    fn into_result(self) -> Result<(), BoxError>;
}

impl TaskOutcome for () {
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> TaskOutcome for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

pub(crate) type OnceCallback = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;
pub(crate) type RepeatingCallback = Box<dyn FnMut() -> Result<(), BoxError> + Send>;

/// Type-erased callback.
pub(crate) enum Callback {
    Once(OnceCallback),
    Repeating(RepeatingCallback),
}

impl Callback {
    pub(crate) fn once<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutcome,
    {
        Callback::Once(Box::new(move || f().into_result()))
    }

    pub(crate) fn repeating<F, R>(mut f: F) -> Self
    where
        F: FnMut() -> R + Send + 'static,
        R: TaskOutcome,
    {
        Callback::Repeating(Box::new(move || f().into_result()))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Once(_) => f.write_str("Callback::Once"),
            Callback::Repeating(_) => f.write_str("Callback::Repeating"),
        }
    }
}

/// A task owned by one of the queues.
#[derive(Debug)]
pub(crate) struct PendingTask {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Virtual time at which the task becomes eligible.
    pub due: Duration,
    /// Re-arm interval for periodic macrotasks.
    pub period: Option<Duration>,
    /// Drain generation that was current when the task was enqueued.
    pub generation: u64,
    pub callback: Callback,
}

/// Read-only view of a queued task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    /// The task's unique identifier.
    pub id: TaskId,
    /// Which queue holds the task.
    pub kind: TaskKind,
    /// When the task becomes eligible. Always the current time for microtasks.
    pub due: Duration,
    /// Interval of a periodic task.
    pub period: Option<Duration>,
}

impl From<&PendingTask> for TaskInfo {
    fn from(task: &PendingTask) -> Self {
        Self {
            id: task.id,
            kind: task.kind,
            due: task.due,
            period: task.period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_unique_and_ordered() {
        let id1 = TaskId::next();
        let id2 = TaskId::next();

        assert_ne!(id1, id2);
        assert!(id1 < id2);
    }

    #[test]
    fn test_display() {
        let id = TaskId(7);
        assert_eq!(id.to_string(), "Task(7)");
        assert_eq!(TaskKind::Macro.to_string(), "macrotask");
        assert_eq!(TaskKind::Micro.to_string(), "microtask");
    }

    #[test]
    fn test_unit_outcome_is_ok() {
        assert!(().into_result().is_ok());
    }

    #[test]
    fn test_result_outcome_keeps_error() {
        let outcome: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_repeating_callback_runs_many_times() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = Arc::clone(&runs);
        let callback = Callback::repeating(move || {
            runs2.fetch_add(1, Ordering::SeqCst);
        });

        let Callback::Repeating(mut f) = callback else {
            panic!("expected a repeating callback");
        };
        f().unwrap();
        f().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
