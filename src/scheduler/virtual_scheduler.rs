//! The `Scheduler` implementation.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::spawn::Spawned;

use crate::clock::{VirtualClock, VirtualInstant};
use crate::config::{SchedulerConfig, TickOptions};
use crate::delay::IntoDelay;
use crate::error::{Error, Result};
use crate::queue::{Eligibility, MacrotaskQueue, MicrotaskQueue};
use crate::task::{Callback, PendingTask, TaskId, TaskInfo, TaskKind, TaskOutcome};

type RenderHook = Box<dyn FnMut() + Send>;

/// A virtual-time scheduler for delayed callbacks and immediate continuations.
///
/// Nothing runs on its own. Tasks wait in the queues until the test calls
/// [`tick`], [`flush`] or [`flush_microtasks`]. Scheduling and draining require
/// an active scope (see [`enter_scope`](Scheduler::enter_scope)).
///
/// Clones share the same queues and clock.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use testkit_vtime::Scheduler;
///
/// let scheduler = Scheduler::new();
/// let scope = scheduler.enter_scope().unwrap();
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// for (delay, name) in [(10, "a"), (0, "b"), (10, "c")] {
///     let log = Arc::clone(&log);
///     scheduler.schedule_delayed(delay, move || log.lock().push(name)).unwrap();
/// }
///
/// scheduler.tick(10).unwrap();
/// assert_eq!(*log.lock(), vec!["b", "a", "c"]);
/// scope.exit().unwrap();
/// ```
///
/// [`tick`]: Scheduler::tick
/// [`flush`]: Scheduler::flush
/// [`flush_microtasks`]: Scheduler::flush_microtasks
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

pub(crate) struct SchedulerInner {
    config: SchedulerConfig,
    clock: VirtualClock,
    pub(crate) state: Mutex<State>,
    hooks: Mutex<Vec<RenderHook>>,
}

pub(crate) struct State {
    pub(crate) macrotasks: MacrotaskQueue,
    pub(crate) microtasks: MicrotaskQueue,
    /// Bumped at the start of every flush pass and every non-processing tick.
    generation: u64,
    pub(crate) scope_active: bool,
    draining: bool,
    /// Periodic task whose callback is executing right now.
    running: Option<Running>,
    auto_render: bool,
    /// Spawned futures that have not completed yet.
    pub(super) spawned: HashMap<TaskId, Weak<Spawned>>,
}

#[derive(Clone, Copy)]
struct Running {
    id: TaskId,
    cancelled: bool,
}

/// Snapshot returned by [`Scheduler::describe_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerState {
    /// Current virtual time.
    pub now: Duration,
    /// Queued macrotasks, periodic ones included.
    pub pending_macrotasks: usize,
    /// Queued periodic macrotasks.
    pub pending_periodic: usize,
    /// Queued microtasks.
    pub pending_microtasks: usize,
    /// Whether an interception scope is active.
    pub scope_active: bool,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler with the given configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock: VirtualClock::with_start_time(config.start_time),
                state: Mutex::new(State {
                    macrotasks: MacrotaskQueue::new(),
                    microtasks: MicrotaskQueue::new(),
                    generation: 0,
                    scope_active: false,
                    draining: false,
                    running: None,
                    auto_render: config.auto_render,
                    spawned: HashMap::new(),
                }),
                hooks: Mutex::new(Vec::new()),
                config,
            }),
        }
    }

    /// Returns the configuration this scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Returns a handle to the virtual clock.
    #[must_use]
    pub fn clock(&self) -> VirtualClock {
        self.inner.clock.clone()
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Returns the current virtual time as an instant.
    #[must_use]
    pub fn now_instant(&self) -> VirtualInstant {
        VirtualInstant::now(&self.inner.clock)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Schedules `callback` to run once `delay` of virtual time has passed.
    ///
    /// Integer delays are milliseconds. Callbacks with equal due times run in
    /// the order they were scheduled.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a negative delay or one that overflows
    /// virtual time, [`Error::ScopeNotActive`] outside a scope.
    pub fn schedule_delayed<D, F, R>(&self, delay: D, callback: F) -> Result<TaskId>
    where
        D: IntoDelay,
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutcome,
    {
        let delay = delay.into_delay()?;
        self.push_macrotask(TaskId::next(), delay, None, Callback::once(callback))
    }

    /// Schedules `callback` to run every `interval` until cancelled.
    ///
    /// Every firing reuses the returned id. [`flush`](Scheduler::flush) does
    /// not wait for periodic tasks; see [`discard_periodic_tasks`](Scheduler::discard_periodic_tasks).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a negative or zero interval,
    /// [`Error::ScopeNotActive`] outside a scope.
    pub fn schedule_periodic<D, F, R>(&self, interval: D, callback: F) -> Result<TaskId>
    where
        D: IntoDelay,
        F: FnMut() -> R + Send + 'static,
        R: TaskOutcome,
    {
        let interval = interval.into_delay()?;
        if interval.is_zero() {
            return Err(Error::invalid_argument("periodic interval must be positive"));
        }
        self.push_macrotask(
            TaskId::next(),
            interval,
            Some(interval),
            Callback::repeating(callback),
        )
    }

    /// Enqueues `callback` as a microtask.
    ///
    /// # Errors
    ///
    /// [`Error::ScopeNotActive`] outside a scope.
    pub fn schedule_immediate<F, R>(&self, callback: F) -> Result<TaskId>
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutcome,
    {
        self.push_microtask(Callback::once(callback))
    }

    /// Cancels a queued macrotask.
    ///
    /// A periodic task may cancel itself from inside its own callback.
    /// Returns `true` if the task was still pending.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(running) = state.running.as_mut().filter(|r| r.id == id) {
                running.cancelled = true;
                tracing::trace!(event = "scheduler.task.cancel", task = %id, running = true, "Task cancelled");
                return true;
            }
            state.macrotasks.remove(id)
        };
        tracing::trace!(
            event = "scheduler.task.cancel",
            task = %id,
            cancelled = removed.is_some(),
            "Task cancelled"
        );
        removed.is_some()
    }

    /// Drops every periodic task. Returns how many were queued.
    pub fn discard_periodic_tasks(&self) -> usize {
        let discarded = {
            let mut state = self.inner.state.lock();
            if let Some(running) = state.running.as_mut() {
                running.cancelled = true;
            }
            state.macrotasks.drain_periodic()
        };
        tracing::debug!(
            event = "scheduler.periodic.discard",
            count = discarded.len(),
            "Discarded periodic tasks"
        );
        discarded.len()
    }

    pub(crate) fn push_macrotask(
        &self,
        id: TaskId,
        delay: Duration,
        period: Option<Duration>,
        callback: Callback,
    ) -> Result<TaskId> {
        let mut state = self.inner.state.lock();
        if !state.scope_active {
            return Err(Error::ScopeNotActive);
        }
        let due = self.due_after(delay)?;
        let generation = state.generation;
        state.macrotasks.push(PendingTask {
            id,
            kind: TaskKind::Macro,
            due,
            period,
            generation,
            callback,
        });
        tracing::trace!(
            event = "scheduler.macrotask.enqueue",
            task = %id,
            delay = ?delay,
            due = ?due,
            periodic = period.is_some(),
            "Macrotask scheduled"
        );
        Ok(id)
    }

    /// Returns the virtual time `delay` from now.
    pub(super) fn due_after(&self, delay: Duration) -> Result<Duration> {
        self.inner
            .clock
            .now()
            .checked_add(delay)
            .ok_or_else(|| Error::invalid_argument("delay overflows virtual time"))
    }

    pub(crate) fn push_microtask(&self, callback: Callback) -> Result<TaskId> {
        let mut state = self.inner.state.lock();
        if !state.scope_active {
            return Err(Error::ScopeNotActive);
        }
        let id = TaskId::next();
        let generation = state.generation;
        state.microtasks.push(PendingTask {
            id,
            kind: TaskKind::Micro,
            due: self.inner.clock.now(),
            period: None,
            generation,
            callback,
        });
        tracing::trace!(event = "scheduler.microtask.enqueue", task = %id, "Microtask enqueued");
        Ok(id)
    }

    // ========================================================================
    // Draining
    // ========================================================================

    /// Advances virtual time by `amount`, running every macrotask that falls
    /// due on the way.
    ///
    /// Microtasks are drained before the first macrotask and after each one.
    /// Afterwards `now()` is exactly the old time plus `amount`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a negative amount or one that overflows
    /// virtual time, [`Error::ScopeNotActive`] outside a scope,
    /// [`Error::CallbackFailed`] if a callback fails.
    pub fn tick<D: IntoDelay>(&self, amount: D) -> Result<()> {
        self.tick_with(amount, TickOptions::default())
    }

    /// [`tick`](Scheduler::tick) with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`tick`](Scheduler::tick).
    pub fn tick_with<D: IntoDelay>(&self, amount: D, options: TickOptions) -> Result<()> {
        let amount = amount.into_delay()?;
        let _drain = DrainGuard::begin(&self.inner)?;

        let target = self.due_after(amount)?;
        let eligibility = if options.process_new_macrotasks {
            Eligibility::Any
        } else {
            Eligibility::Before(self.bump_generation())
        };
        tracing::debug!(event = "scheduler.tick.start", amount = ?amount, target = ?target, "Tick");

        self.run_microtasks()?;
        loop {
            let next = self.inner.state.lock().macrotasks.pop_due(target, eligibility);
            let Some(task) = next else { break };
            self.inner.clock.advance_to(task.due);
            self.execute(task)?;
            self.run_microtasks()?;
        }
        self.inner.clock.advance_to(target);

        self.render_after_drain();
        Ok(())
    }

    /// Runs every pending non-periodic macrotask, advancing the clock to each
    /// task's due time, with the default pass budget.
    ///
    /// Returns the virtual time that elapsed.
    ///
    /// # Errors
    ///
    /// [`Error::DrainLimitExceeded`] when tasks keep rescheduling themselves,
    /// [`Error::ScopeNotActive`] outside a scope, [`Error::CallbackFailed`] if
    /// a callback fails.
    pub fn flush(&self) -> Result<Duration> {
        self.flush_with_limit(self.inner.config.max_passes)
    }

    /// [`flush`](Scheduler::flush) with an explicit pass budget.
    ///
    /// A pass runs the macrotasks that were queued when it began, in time
    /// order. Tasks enqueued during a pass wait for the next one, and a pass
    /// ends early if such a task is due before the next queued one. The first
    /// pass is free; each further pass counts against `max_passes`.
    ///
    /// # Errors
    ///
    /// Same as [`flush`](Scheduler::flush).
    pub fn flush_with_limit(&self, max_passes: usize) -> Result<Duration> {
        let _drain = DrainGuard::begin(&self.inner)?;
        let start = self.inner.clock.now();
        let mut extra_passes = 0usize;
        let mut first = true;

        loop {
            self.run_microtasks()?;

            let (generation, horizon) = {
                let mut state = self.inner.state.lock();
                if state.macrotasks.one_shot_count() == 0 {
                    break;
                }
                if !first {
                    extra_passes += 1;
                    if extra_passes > max_passes {
                        let pending = state.macrotasks.len() + state.microtasks.len();
                        tracing::debug!(
                            event = "scheduler.flush.limit",
                            max_passes,
                            pending,
                            "Drain limit exceeded"
                        );
                        return Err(Error::DrainLimitExceeded { max_passes, pending });
                    }
                }
                first = false;
                state.generation += 1;
                let generation = state.generation;
                let Some(horizon) = state.macrotasks.last_one_shot_due(generation) else {
                    break;
                };
                (generation, horizon)
            };
            tracing::debug!(
                event = "scheduler.flush.pass",
                pass = extra_passes,
                horizon = ?horizon,
                "Flush pass"
            );

            loop {
                let next = self
                    .inner
                    .state
                    .lock()
                    .macrotasks
                    .pop_due(horizon, Eligibility::BeforeOrYield(generation));
                let Some(task) = next else { break };
                self.inner.clock.advance_to(task.due);
                self.execute(task)?;
                self.run_microtasks()?;
            }
        }

        self.render_after_drain();
        Ok(self.inner.clock.now() - start)
    }

    /// Runs microtasks until the queue is empty, including ones enqueued by
    /// the microtasks themselves. Returns how many ran.
    ///
    /// # Errors
    ///
    /// [`Error::ScopeNotActive`] outside a scope, [`Error::CallbackFailed`] if
    /// a callback fails.
    pub fn flush_microtasks(&self) -> Result<usize> {
        let _drain = DrainGuard::begin(&self.inner)?;
        let ran = self.run_microtasks()?;
        self.render_after_drain();
        Ok(ran)
    }

    fn run_microtasks(&self) -> Result<usize> {
        let mut ran = 0;
        loop {
            let next = self.inner.state.lock().microtasks.pop();
            let Some(task) = next else { break };
            self.execute(task)?;
            ran += 1;
        }
        Ok(ran)
    }

    fn bump_generation(&self) -> u64 {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.generation
    }

    /// Runs one task with the state lock released.
    fn execute(&self, task: PendingTask) -> Result<()> {
        let PendingTask {
            id,
            kind,
            period,
            callback,
            ..
        } = task;
        tracing::trace!(
            event = "scheduler.task.execute",
            task = %id,
            %kind,
            now = ?self.inner.clock.now(),
            "Executing task"
        );

        let result = match callback {
            Callback::Once(f) => f(),
            Callback::Repeating(mut f) => {
                self.inner.state.lock().running = Some(Running {
                    id,
                    cancelled: false,
                });
                let result = f();

                let rearm = {
                    let mut state = self.inner.state.lock();
                    let cancelled = state.running.take().map_or(true, |r| r.cancelled);
                    !cancelled && result.is_ok() && state.scope_active
                };
                if let Some(interval) = period.filter(|_| rearm) {
                    match self.due_after(interval) {
                        Ok(due) => {
                            let mut state = self.inner.state.lock();
                            let generation = state.generation;
                            state.macrotasks.push(PendingTask {
                                id,
                                kind,
                                due,
                                period,
                                generation,
                                callback: Callback::Repeating(f),
                            });
                        }
                        Err(_) => tracing::warn!(
                            event = "scheduler.periodic.expired",
                            task = %id,
                            interval = ?interval,
                            "Periodic task dropped, next firing overflows virtual time"
                        ),
                    }
                }
                result
            }
        };

        if self.inner.state.lock().auto_render {
            self.render();
        }
        result.map_err(|source| Error::callback_failed(id, source))
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Registers a hook called after each drain step.
    ///
    /// By default hooks run once when `tick`, `flush` or `flush_microtasks`
    /// completes. In auto-render mode they run after every executed task
    /// instead.
    pub fn on_drain_step_rendered<F>(&self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.hooks.lock().push(Box::new(hook));
    }

    /// Switches auto-render mode on or off.
    pub fn set_auto_render(&self, enabled: bool) {
        self.inner.state.lock().auto_render = enabled;
    }

    /// Returns whether auto-render mode is on.
    #[must_use]
    pub fn auto_render(&self) -> bool {
        self.inner.state.lock().auto_render
    }

    fn render_after_drain(&self) {
        if !self.auto_render() {
            self.render();
        }
    }

    fn render(&self) {
        let hooks = std::mem::take(&mut *self.inner.hooks.lock());
        if hooks.is_empty() {
            return;
        }
        tracing::trace!(event = "scheduler.render", hooks = hooks.len(), "Render hooks");
        let mut rendering = RenderGuard {
            inner: &self.inner,
            hooks,
        };
        for hook in &mut rendering.hooks {
            hook();
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Returns the current time and queue sizes.
    #[must_use]
    pub fn describe_state(&self) -> SchedulerState {
        let state = self.inner.state.lock();
        SchedulerState {
            now: self.inner.clock.now(),
            pending_macrotasks: state.macrotasks.len(),
            pending_periodic: state.macrotasks.periodic_count(),
            pending_microtasks: state.microtasks.len(),
            scope_active: state.scope_active,
        }
    }

    /// Lists queued tasks: microtasks first, then macrotasks in execution order.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<TaskInfo> {
        let state = self.inner.state.lock();
        let mut tasks = state.microtasks.infos();
        tasks.extend(state.macrotasks.infos());
        tasks
    }

    /// Returns the due time of the earliest queued macrotask.
    #[must_use]
    pub fn next_due(&self) -> Option<Duration> {
        self.inner.state.lock().macrotasks.next_due()
    }

    /// Returns `true` if the macrotask is still queued.
    #[must_use]
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.inner.state.lock().macrotasks.contains(id)
    }

    /// Returns `true` if no task of either kind is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.macrotasks.is_empty() && state.microtasks.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.describe_state();
        f.debug_struct("Scheduler")
            .field("now", &state.now)
            .field("macrotasks", &state.pending_macrotasks)
            .field("microtasks", &state.pending_microtasks)
            .field("scope_active", &state.scope_active)
            .finish()
    }
}

/// Marks the scheduler as draining for the lifetime of a drain call.
///
/// Released on every exit path, including a panicking callback.
struct DrainGuard<'a> {
    inner: &'a SchedulerInner,
}

impl<'a> DrainGuard<'a> {
    fn begin(inner: &'a SchedulerInner) -> Result<Self> {
        let mut state = inner.state.lock();
        if !state.scope_active {
            return Err(Error::ScopeNotActive);
        }
        if state.draining {
            return Err(Error::ReentrantDrain);
        }
        state.draining = true;
        Ok(Self { inner })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.draining = false;
        state.running = None;
    }
}

/// Hooks taken out for a render, put back on every exit path.
struct RenderGuard<'a> {
    inner: &'a SchedulerInner,
    hooks: Vec<RenderHook>,
}

impl Drop for RenderGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.inner.hooks.lock();
        // Hooks registered while rendering go after the existing ones.
        let mut hooks = std::mem::take(&mut self.hooks);
        hooks.append(&mut slot);
        *slot = hooks;
    }
}
