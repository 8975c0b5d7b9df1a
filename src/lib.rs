//! # testkit-vtime
//!
//! > Virtual time for deterministic async tests
//!
//! **testkit-vtime** replaces timers and continuations with a scheduler that
//! only moves when the test tells it to. Delayed callbacks, immediate
//! continuations and spawned futures are queued; `tick`, `flush` and
//! `flush_microtasks` run them in a fixed, reproducible order.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use testkit_vtime::prelude::*;
//!
//! fake_async(SchedulerConfig::new(), |scheduler| {
//!     let log = Arc::new(Mutex::new(Vec::new()));
//!
//!     let l = Arc::clone(&log);
//!     scheduler.schedule_delayed(1_000, move || l.lock().push("timer")).unwrap();
//!     let l = Arc::clone(&log);
//!     scheduler.schedule_immediate(move || l.lock().push("microtask")).unwrap();
//!
//!     scheduler.tick(999).unwrap();
//!     assert_eq!(*log.lock(), vec!["microtask"]);
//!
//!     scheduler.tick(1).unwrap();
//!     assert_eq!(*log.lock(), vec!["microtask", "timer"]);
//! })
//! .unwrap();
//! ```
//!
//! ## Features
//!
//! - **Virtual clock** - Time only advances through the scheduler
//! - **Two queues** - Microtasks always drain before the next timer
//! - **Bounded flush** - Self-rescheduling timers fail fast instead of hanging
//! - **Interception scopes** - Redirect [`AsyncSeams`] into the scheduler for one test
//! - **Quiescence** - Await [`PendingWork::when_stable`] instead of draining by hand

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Virtual clock driven by the scheduler
pub mod clock;

pub mod config;
pub mod delay;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod scope;
pub mod stability;
pub mod task;

mod queue;

/// Prelude for convenient imports
///
/// ```rust
/// use testkit_vtime::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{VirtualClock, VirtualInstant};
    pub use crate::config::{LeakPolicy, SchedulerConfig, TickOptions};
    pub use crate::delay::IntoDelay;
    pub use crate::error::{Error, Result};
    pub use crate::scheduler::{JoinHandle, Scheduler, SchedulerState};
    pub use crate::scope::{fake_async, AsyncPrimitives, AsyncSeams, ScopeGuard};
    pub use crate::stability::PendingWork;
    pub use crate::task::{TaskId, TaskInfo, TaskKind};
}

// Re-exports
pub use clock::{VirtualClock, VirtualInstant};
pub use config::{LeakPolicy, SchedulerConfig, TickOptions};
pub use delay::IntoDelay;
pub use error::{BoxError, Error, Result};
pub use scheduler::{JoinHandle, Scheduler, SchedulerState, VirtualSleep, VirtualTimeout};
pub use scope::{fake_async, AsyncPrimitives, AsyncSeams, LeakReport, ScopeGuard};
pub use stability::{PendingWork, PendingWorkGuard, WhenStable};
pub use task::{TaskId, TaskInfo, TaskKind, TaskOutcome};

#[cfg(feature = "tokio")]
pub use runtime::tokio::TokioPrimitives;

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use testkit_vtime_macros::test;
