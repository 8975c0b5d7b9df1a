//! Tokio runtime integration.
//!
//! [`TokioPrimitives`] implements [`AsyncPrimitives`] with real Tokio timers
//! and tasks, so code written against [`AsyncSeams`](crate::AsyncSeams) runs
//! unchanged in production and under a virtual scheduler in tests.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use testkit_vtime::AsyncSeams;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let seams = AsyncSeams::tokio();
//!     let fired = Arc::new(AtomicBool::new(false));
//!     let flag = Arc::clone(&fired);
//!     seams.set_timeout(1, move || flag.store(true, Ordering::SeqCst)).unwrap();
//!
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//!     assert!(fired.load(Ordering::SeqCst));
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ::tokio::runtime::Handle;
use ::tokio::task::AbortHandle;
use ::tokio::time::Instant;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::scheduler::BoxFuture;
use crate::scope::{AsyncPrimitives, BoxCallback};
use crate::task::TaskId;

/// Real-time primitives that run on a Tokio runtime.
///
/// Without an explicit handle, work goes to the runtime the caller is
/// running on.
#[derive(Clone)]
pub struct TokioPrimitives {
    handle: Option<Handle>,
    start: Instant,
    /// Delayed callbacks and spawned futures that can still be cancelled.
    tasks: Arc<Mutex<HashMap<TaskId, AbortHandle>>>,
}

impl TokioPrimitives {
    /// Uses the runtime of the calling context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: None,
            start: Instant::now(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Always spawns onto `handle`.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            ..Self::new()
        }
    }

    /// Number of delayed callbacks and spawned futures that have neither
    /// finished nor been cancelled.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    fn runtime(&self) -> Result<Handle> {
        match &self.handle {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|e| Error::Runtime(e.to_string())),
        }
    }
}

impl Default for TokioPrimitives {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokioPrimitives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioPrimitives")
            .field("pending_tasks", &self.pending_tasks())
            .finish_non_exhaustive()
    }
}

fn report(id: TaskId, result: std::result::Result<(), crate::error::BoxError>) {
    if let Err(error) = result {
        tracing::error!(event = "runtime.task.failed", task = %id, %error, "Callback failed");
    }
}

impl AsyncPrimitives for TokioPrimitives {
    fn schedule_delayed(&self, delay: Duration, callback: BoxCallback) -> Result<TaskId> {
        let runtime = self.runtime()?;
        let id = TaskId::next();
        let tasks = Arc::clone(&self.tasks);

        // Held across spawn so the entry exists before the task can remove it.
        let mut pending = self.tasks.lock();
        let task = runtime.spawn(async move {
            ::tokio::time::sleep(delay).await;
            if tasks.lock().remove(&id).is_some() {
                report(id, callback());
            }
        });
        pending.insert(id, task.abort_handle());
        Ok(id)
    }

    fn schedule_immediate(&self, callback: BoxCallback) -> Result<TaskId> {
        let runtime = self.runtime()?;
        let id = TaskId::next();
        runtime.spawn(async move { report(id, callback()) });
        Ok(id)
    }

    fn spawn(&self, future: BoxFuture) -> Result<TaskId> {
        let runtime = self.runtime()?;
        let id = TaskId::next();
        let tasks = Arc::clone(&self.tasks);

        let mut pending = self.tasks.lock();
        let task = runtime.spawn(async move {
            future.await;
            tasks.lock().remove(&id);
        });
        pending.insert(id, task.abort_handle());
        Ok(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        match self.tasks.lock().remove(&id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}
