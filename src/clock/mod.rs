//! Virtual time for the scheduler
//!
//! [`VirtualClock`] is a monotonic counter that only moves when the
//! [`Scheduler`](crate::Scheduler) advances it during `tick` or `flush`.
//! Code under test reads it through [`VirtualClock::now`] or a
//! [`VirtualInstant`] instead of the system clock.
//!
//! # Example
//!
//! ```rust
//! use testkit_vtime::Scheduler;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new();
//! let scope = scheduler.enter_scope().unwrap();
//! let start = scheduler.now_instant();
//!
//! scheduler.tick(Duration::from_secs(10)).unwrap();
//! assert_eq!(start.elapsed(&scheduler.clock()), Duration::from_secs(10));
//! assert_eq!(scheduler.now_instant() - start, Duration::from_secs(10));
//! scope.exit().unwrap();
//! ```

mod instant;
mod virtual_clock;

pub use instant::VirtualInstant;
pub use virtual_clock::VirtualClock;
