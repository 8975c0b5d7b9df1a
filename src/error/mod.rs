//! Error definitions
//!
//! This module provides error types for testkit-vtime.

use thiserror::Error;

use crate::scope::LeakReport;
use crate::task::TaskId;

/// Boxed error returned by a fallible callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for testkit-vtime
#[derive(Error, Debug)]
pub enum Error {
    /// A negative delay, tick amount or interval, or a counter underflow.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `enter_scope` was called while a scope is already active.
    #[error("An interception scope is already active")]
    ScopeAlreadyActive,

    /// A scheduler operation was attempted with no active scope.
    #[error("No interception scope is active")]
    ScopeNotActive,

    /// `flush` ran out of passes while tasks were still queued.
    #[error(
        "flush failed after reaching the limit of {max_passes} passes with {pending} task(s) \
         still queued; does the code under test use a self-rescheduling timer?"
    )]
    DrainLimitExceeded {
        /// The pass budget that was exhausted.
        max_passes: usize,
        /// Tasks still queued when the budget ran out.
        pending: usize,
    },

    /// The scope was torn down with tasks still queued.
    #[error("{0}")]
    LeakedTasksOnTeardown(LeakReport),

    /// A fallible callback returned an error.
    #[error("{task} failed: {source}")]
    CallbackFailed {
        /// The task whose callback failed.
        task: TaskId,
        /// The error the callback returned.
        #[source]
        source: BoxError,
    },

    /// A [`VirtualTimeout`](crate::VirtualTimeout) elapsed.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The ambient runtime could not accept the work.
    #[error("Ambient runtime unavailable: {0}")]
    Runtime(String),

    /// A drain operation was started from inside a running callback.
    #[error("tick/flush cannot be called from inside a scheduled callback")]
    ReentrantDrain,
}

impl Error {
    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a callback failure error.
    #[must_use]
    pub fn callback_failed(task: TaskId, source: BoxError) -> Self {
        Self::CallbackFailed { task, source }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
