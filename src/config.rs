//! Scheduler configuration.

use std::time::Duration;

/// Default pass budget for [`Scheduler::flush`](crate::Scheduler::flush).
pub const DEFAULT_MAX_PASSES: usize = 20;

/// What to do with tasks still queued when a scope is torn down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LeakPolicy {
    /// Discard silently.
    Ignore,
    /// Discard, log a warning and return the report from
    /// [`ScopeGuard::exit`](crate::ScopeGuard::exit).
    #[default]
    Report,
    /// Discard and fail with
    /// [`Error::LeakedTasksOnTeardown`](crate::Error::LeakedTasksOnTeardown).
    Fail,
}

/// Configuration for a [`Scheduler`](crate::Scheduler).
///
/// # Example
///
/// ```rust
/// use testkit_vtime::{LeakPolicy, SchedulerConfig};
/// use std::time::Duration;
///
/// let config = SchedulerConfig::new()
///     .max_passes(50)
///     .auto_render()
///     .start_time(Duration::from_secs(100))
///     .leak_policy(LeakPolicy::Fail);
///
/// assert_eq!(config.max_passes, 50);
/// assert!(config.auto_render);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pass budget used by `flush()`.
    pub max_passes: usize,
    /// Fire the render hook after every executed task instead of once per drain.
    pub auto_render: bool,
    /// Initial virtual time.
    pub start_time: Duration,
    /// Teardown behaviour for leftover tasks.
    pub leak_policy: LeakPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            auto_render: false,
            start_time: Duration::ZERO,
            leak_policy: LeakPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Create a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pass budget for `flush()`.
    #[must_use]
    pub fn max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Render after every executed task.
    #[must_use]
    pub fn auto_render(mut self) -> Self {
        self.auto_render = true;
        self
    }

    /// Set the initial virtual time.
    #[must_use]
    pub fn start_time(mut self, time: Duration) -> Self {
        self.start_time = time;
        self
    }

    /// Set the teardown leak policy.
    #[must_use]
    pub fn leak_policy(mut self, policy: LeakPolicy) -> Self {
        self.leak_policy = policy;
        self
    }
}

/// Options for [`Scheduler::tick_with`](crate::Scheduler::tick_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOptions {
    /// Run macrotasks enqueued during the tick if they fall due before it ends.
    pub process_new_macrotasks: bool,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            process_new_macrotasks: true,
        }
    }
}
