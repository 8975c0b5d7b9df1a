//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use proptest::test_runner::Config as ProptestConfig;
use testkit_vtime::{Scheduler, SchedulerConfig, ScopeGuard};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging at TRACE level.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Proptest configuration with a fixed number of cases.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

/// A scheduler with an active scope.
#[must_use]
pub fn active_scheduler(config: SchedulerConfig) -> (Scheduler, ScopeGuard) {
    let scheduler = Scheduler::with_config(config);
    let scope = scheduler.enter_scope().expect("enter scope");
    (scheduler, scope)
}

/// Shared execution log.
pub type Log<T> = Arc<Mutex<Vec<T>>>;

#[must_use]
pub fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// A callback that appends `value` to `log`.
pub fn record<T: Send + 'static>(log: &Log<T>, value: T) -> impl FnOnce() + Send + 'static {
    let log = Arc::clone(log);
    move || log.lock().push(value)
}
