//! Ambient async primitives backed by a real runtime.
//!
//! These are what [`AsyncSeams`](crate::AsyncSeams) forwards to when no
//! interception scope is active. Each runtime integration lives behind its
//! own feature flag.

#[cfg(feature = "tokio")]
pub mod tokio;
