//! The two task queues driven by the scheduler.
//!
//! - [`MacrotaskQueue`] orders delayed callbacks by `(due time, insertion order)`.
//! - [`MicrotaskQueue`] is a plain FIFO of immediate continuations.
//!
//! Neither queue runs anything; the [`Scheduler`](crate::Scheduler) pops tasks
//! and executes them with its own lock released.

mod macrotask;
mod microtask;

pub(crate) use macrotask::{Eligibility, MacrotaskQueue};
pub(crate) use microtask::MicrotaskQueue;
