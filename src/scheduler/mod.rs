//! Virtual-time scheduling
//!
//! This module provides the [`Scheduler`], which owns the virtual clock and
//! both task queues, plus the futures that sit on top of it:
//!
//! - [`VirtualSleep`] completes when a macrotask at its deadline fires.
//! - [`VirtualTimeout`] races a future against a [`VirtualSleep`].
//! - [`JoinHandle`] is returned by [`Scheduler::spawn`]; spawned futures are
//!   polled from microtasks.
//!
//! # Example
//!
//! ```rust
//! use testkit_vtime::Scheduler;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new();
//! let scope = scheduler.enter_scope().unwrap();
//!
//! let sleep = scheduler.sleep(Duration::from_secs(30)).unwrap();
//! let handle = scheduler
//!     .spawn(async move {
//!         sleep.await;
//!         "done"
//!     })
//!     .unwrap();
//!
//! scheduler.flush_microtasks().unwrap();
//! assert!(!handle.is_complete());
//!
//! scheduler.tick(Duration::from_secs(30)).unwrap();
//! assert_eq!(handle.take(), Some("done"));
//! scope.exit().unwrap();
//! ```

mod sleep;
mod spawn;
mod virtual_scheduler;

pub use sleep::{VirtualSleep, VirtualTimeout};
pub use spawn::{BoxFuture, JoinHandle};
pub use virtual_scheduler::{Scheduler, SchedulerState};
