//! Interception scopes and the async seams they redirect.
//!
//! Code under test never calls a global timer API. It holds an [`AsyncSeams`]
//! and schedules through it. By default the seams forward to an ambient
//! [`AsyncPrimitives`] implementation (for example
//! [`TokioPrimitives`](crate::runtime::tokio::TokioPrimitives)). While a scope
//! entered with [`Scheduler::enter_scope_with`] is alive, the same calls land
//! in the scheduler's queues instead.
//!
//! A scope is released by [`ScopeGuard::exit`] or by dropping the guard, so
//! the ambient primitives come back even if the test body panics.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use testkit_vtime::{AsyncSeams, Scheduler};
//!
//! # #[cfg(feature = "tokio")] {
//! let seams = AsyncSeams::tokio();
//! let scheduler = Scheduler::new();
//!
//! let scope = scheduler.enter_scope_with(&seams).unwrap();
//! let fired = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&fired);
//! seams.set_timeout(100, move || flag.store(true, Ordering::SeqCst)).unwrap();
//!
//! scheduler.tick(100).unwrap();
//! assert!(fired.load(Ordering::SeqCst));
//!
//! scope.exit().unwrap();
//! assert!(!seams.is_intercepted());
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::{LeakPolicy, SchedulerConfig};
use crate::delay::IntoDelay;
use crate::error::{BoxError, Error, Result};
use crate::scheduler::{BoxFuture, Scheduler};
use crate::task::{Callback, TaskId, TaskOutcome};

/// Boxed one-shot callback passed through the seams.
pub type BoxCallback = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send + 'static>;

/// The three schedule primitives code under test may call, plus cancellation
/// and a time source.
///
/// Implemented by [`Scheduler`] (virtual) and by ambient runtimes.
pub trait AsyncPrimitives: Send + Sync {
    /// Runs `callback` after `delay`.
    ///
    /// # Errors
    ///
    /// Implementation specific; the scheduler fails outside a scope.
    fn schedule_delayed(&self, delay: Duration, callback: BoxCallback) -> Result<TaskId>;

    /// Runs `callback` as soon as the current work yields.
    ///
    /// # Errors
    ///
    /// Implementation specific; the scheduler fails outside a scope.
    fn schedule_immediate(&self, callback: BoxCallback) -> Result<TaskId>;

    /// Drives `future` to completion.
    ///
    /// # Errors
    ///
    /// Implementation specific; the scheduler fails outside a scope.
    fn spawn(&self, future: BoxFuture) -> Result<TaskId>;

    /// Cancels a delayed callback or a spawned future. Returns `true` if it
    /// had not finished yet.
    fn cancel(&self, id: TaskId) -> bool;

    /// Current time as seen by this implementation.
    fn now(&self) -> Duration;
}

impl AsyncPrimitives for Scheduler {
    fn schedule_delayed(&self, delay: Duration, callback: BoxCallback) -> Result<TaskId> {
        self.push_macrotask(TaskId::next(), delay, None, Callback::Once(callback))
    }

    fn schedule_immediate(&self, callback: BoxCallback) -> Result<TaskId> {
        self.push_microtask(Callback::Once(callback))
    }

    fn spawn(&self, future: BoxFuture) -> Result<TaskId> {
        self.spawn_boxed(future)
    }

    fn cancel(&self, id: TaskId) -> bool {
        Scheduler::cancel(self, id) || self.abort_spawned(id)
    }

    fn now(&self) -> Duration {
        Scheduler::now(self)
    }
}

/// The async entry points handed to code under test.
///
/// Clones share the same redirection state.
#[derive(Clone)]
pub struct AsyncSeams {
    inner: Arc<SeamsInner>,
}

struct SeamsInner {
    ambient: Arc<dyn AsyncPrimitives>,
    intercept: RwLock<Option<Arc<dyn AsyncPrimitives>>>,
}

impl AsyncSeams {
    /// Creates seams that forward to `ambient` until a scope intercepts them.
    pub fn new(ambient: impl AsyncPrimitives + 'static) -> Self {
        Self {
            inner: Arc::new(SeamsInner {
                ambient: Arc::new(ambient),
                intercept: RwLock::new(None),
            }),
        }
    }

    /// Seams backed by the Tokio runtime.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn tokio() -> Self {
        Self::new(crate::runtime::tokio::TokioPrimitives::new())
    }

    /// Returns `true` while a scope redirects these seams.
    #[must_use]
    pub fn is_intercepted(&self) -> bool {
        self.inner.intercept.read().is_some()
    }

    fn current(&self) -> Arc<dyn AsyncPrimitives> {
        self.inner
            .intercept
            .read()
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.inner.ambient))
    }

    /// Schedules a delayed callback. Integer delays are milliseconds.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a negative delay, or whatever the
    /// current primitives report.
    pub fn set_timeout<D, F, R>(&self, delay: D, callback: F) -> Result<TaskId>
    where
        D: IntoDelay,
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutcome,
    {
        let delay = delay.into_delay()?;
        self.current()
            .schedule_delayed(delay, Box::new(move || callback().into_result()))
    }

    /// Schedules an immediate continuation.
    ///
    /// # Errors
    ///
    /// Whatever the current primitives report.
    pub fn queue_microtask<F, R>(&self, callback: F) -> Result<TaskId>
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutcome,
    {
        self.current()
            .schedule_immediate(Box::new(move || callback().into_result()))
    }

    /// Spawns a future through the current primitives.
    ///
    /// # Errors
    ///
    /// Whatever the current primitives report.
    pub fn spawn<F>(&self, future: F) -> Result<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.current().spawn(Box::pin(future))
    }

    /// Cancels a delayed callback or a spawned future.
    pub fn clear_timeout(&self, id: TaskId) -> bool {
        self.current().cancel(id)
    }

    /// Current time from the current primitives.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.current().now()
    }

    fn install(&self, primitives: Arc<dyn AsyncPrimitives>) -> Result<()> {
        let mut intercept = self.inner.intercept.write();
        if intercept.is_some() {
            return Err(Error::ScopeAlreadyActive);
        }
        *intercept = Some(primitives);
        Ok(())
    }

    fn restore(&self) {
        self.inner.intercept.write().take();
    }
}

impl fmt::Debug for AsyncSeams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSeams")
            .field("intercepted", &self.is_intercepted())
            .finish_non_exhaustive()
    }
}

/// Tasks that were still queued when a scope was torn down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// One-shot macrotasks.
    pub macrotasks: usize,
    /// Periodic macrotasks.
    pub periodic: usize,
    /// Microtasks.
    pub microtasks: usize,
}

impl LeakReport {
    /// Returns `true` if nothing leaked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Total number of leaked tasks.
    #[must_use]
    pub fn total(&self) -> usize {
        self.macrotasks + self.periodic + self.microtasks
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} timer(s), {} periodic timer(s) and {} microtask(s) still in the queue",
            self.macrotasks, self.periodic, self.microtasks
        )
    }
}

/// An active interception scope.
///
/// Created by [`Scheduler::enter_scope`]. While it lives the scheduler accepts
/// work and can be drained. Dropping it, or calling [`exit`](ScopeGuard::exit),
/// discards anything still queued and restores intercepted seams.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ScopeGuard {
    scheduler: Scheduler,
    seams: Option<AsyncSeams>,
    active: bool,
}

impl ScopeGuard {
    /// The scheduler this scope belongs to.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Ends the scope and reports leftover tasks.
    ///
    /// # Errors
    ///
    /// [`Error::LeakedTasksOnTeardown`] if tasks leaked and the scheduler's
    /// [`LeakPolicy`] is `Fail`.
    pub fn exit(mut self) -> Result<LeakReport> {
        let report = self.teardown();
        match self.scheduler.config().leak_policy {
            LeakPolicy::Fail if !report.is_empty() => Err(Error::LeakedTasksOnTeardown(report)),
            _ => Ok(report),
        }
    }

    fn teardown(&mut self) -> LeakReport {
        if !self.active {
            return LeakReport::default();
        }
        self.active = false;
        if let Some(seams) = &self.seams {
            seams.restore();
        }

        let (report, discarded) = {
            let mut state = self.scheduler.inner.state.lock();
            state.scope_active = false;
            let report = LeakReport {
                macrotasks: state.macrotasks.one_shot_count(),
                periodic: state.macrotasks.periodic_count(),
                microtasks: state.microtasks.len(),
            };
            let mut discarded = state.macrotasks.clear();
            discarded.extend(state.microtasks.clear());
            (report, discarded)
        };
        // Dropped callbacks may own sleeps that cancel themselves.
        drop(discarded);
        let abandoned = self.scheduler.abandon_spawned();

        tracing::debug!(
            event = "scheduler.scope.exit",
            leaked = report.total(),
            abandoned,
            "Scope exited"
        );
        if !report.is_empty() && self.scheduler.config().leak_policy != LeakPolicy::Ignore {
            tracing::warn!(
                event = "scheduler.scope.leak",
                macrotasks = report.macrotasks,
                periodic = report.periodic,
                microtasks = report.microtasks,
                "{report}"
            );
        }
        report
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let report = self.teardown();
        if self.scheduler.config().leak_policy == LeakPolicy::Fail
            && !report.is_empty()
            && !std::thread::panicking()
        {
            panic!("{}", Error::LeakedTasksOnTeardown(report));
        }
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("active", &self.active)
            .field("seams", &self.seams.is_some())
            .finish()
    }
}

impl Scheduler {
    /// Activates the scheduler.
    ///
    /// # Errors
    ///
    /// [`Error::ScopeAlreadyActive`] if a scope is already active.
    pub fn enter_scope(&self) -> Result<ScopeGuard> {
        self.activate(None)
    }

    /// Activates the scheduler and redirects `seams` into it.
    ///
    /// # Errors
    ///
    /// [`Error::ScopeAlreadyActive`] if this scheduler or `seams` already has
    /// an active scope.
    pub fn enter_scope_with(&self, seams: &AsyncSeams) -> Result<ScopeGuard> {
        self.activate(Some(seams.clone()))
    }

    fn activate(&self, seams: Option<AsyncSeams>) -> Result<ScopeGuard> {
        let mut state = self.inner.state.lock();
        if state.scope_active {
            return Err(Error::ScopeAlreadyActive);
        }
        if let Some(seams) = &seams {
            seams.install(Arc::new(self.clone()))?;
        }
        state.scope_active = true;
        tracing::debug!(
            event = "scheduler.scope.enter",
            seams = seams.is_some(),
            "Scope entered"
        );
        Ok(ScopeGuard {
            scheduler: self.clone(),
            seams,
            active: true,
        })
    }
}

/// Runs `body` inside a fresh scope on a new scheduler.
///
/// # Errors
///
/// [`Error::LeakedTasksOnTeardown`] when tasks leak and the policy is `Fail`.
///
/// # Example
///
/// ```rust
/// use testkit_vtime::{fake_async, SchedulerConfig};
///
/// let elapsed = fake_async(SchedulerConfig::new(), |scheduler| {
///     scheduler.schedule_delayed(250, || ()).unwrap();
///     scheduler.flush().unwrap()
/// })
/// .unwrap();
///
/// assert_eq!(elapsed.as_millis(), 250);
/// ```
pub fn fake_async<T, F>(config: SchedulerConfig, body: F) -> Result<T>
where
    F: FnOnce(&Scheduler) -> T,
{
    let scheduler = Scheduler::with_config(config);
    let scope = scheduler.enter_scope()?;
    let output = body(&scheduler);
    scope.exit()?;
    Ok(output)
}
