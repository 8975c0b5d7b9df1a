//! Quiescence tracking.
//!
//! [`PendingWork`] is a shared counter that application code bumps when it
//! issues work it considers outstanding and settles when that work completes.
//! [`PendingWork::when_stable`] returns a future that resolves once the counter
//! has been seen at zero. It does not look at the scheduler's queues, so it
//! works the same with or without an interception scope.
//!
//! # Example
//!
//! ```rust
//! use testkit_vtime::PendingWork;
//!
//! # futures::executor::block_on(async {
//! let work = PendingWork::new();
//! let guard = work.track();
//! assert!(!work.is_stable());
//!
//! let stable = work.when_stable();
//! drop(guard);
//! stable.await;
//! assert!(work.is_stable());
//! # });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Shared outstanding-work counter.
///
/// Clones share the same counter.
#[derive(Clone, Default)]
pub struct PendingWork {
    inner: Arc<Mutex<WorkState>>,
}

#[derive(Default)]
struct WorkState {
    count: usize,
    /// Bumped every time the count drops to zero.
    epoch: u64,
    /// Registered by pending `WhenStable` futures, keyed by waiter id.
    waiters: HashMap<u64, Waker>,
    next_waiter: u64,
}

impl PendingWork {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more unit of outstanding work.
    pub fn increment(&self) {
        let count = {
            let mut state = self.inner.lock();
            state.count += 1;
            state.count
        };
        tracing::trace!(event = "scheduler.pending_work.increment", count, "Pending work added");
    }

    /// Records that one unit of work has completed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the counter is already zero.
    pub fn decrement(&self) -> Result<()> {
        let wakers = {
            let mut state = self.inner.lock();
            if state.count == 0 {
                return Err(Error::invalid_argument(
                    "pending work decremented below zero",
                ));
            }
            state.count -= 1;
            tracing::trace!(
                event = "scheduler.pending_work.decrement",
                count = state.count,
                "Pending work settled"
            );
            if state.count > 0 {
                return Ok(());
            }
            state.epoch += 1;
            std::mem::take(&mut state.waiters)
        };
        tracing::debug!(
            event = "scheduler.pending_work.stable",
            waiters = wakers.len(),
            "Pending work reached zero"
        );
        for waker in wakers.into_values() {
            waker.wake();
        }
        Ok(())
    }

    /// Increments the counter and returns a guard that decrements it on drop.
    #[must_use = "the work is settled as soon as the guard is dropped"]
    pub fn track(&self) -> PendingWorkGuard {
        self.increment();
        PendingWorkGuard { work: self.clone() }
    }

    /// Current amount of outstanding work.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// Returns `true` when no work is outstanding.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.count() == 0
    }

    /// Returns a future that resolves once the counter is observed at zero.
    ///
    /// If the counter drops to zero after this call and then rises again
    /// before the future is polled, the future still resolves. It never
    /// resolves while work issued before the call is outstanding and the
    /// counter has not reached zero since.
    pub fn when_stable(&self) -> WhenStable {
        let epoch = self.inner.lock().epoch;
        WhenStable {
            work: self.clone(),
            epoch,
            waiter: None,
        }
    }
}

impl fmt::Debug for PendingWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("PendingWork")
            .field("count", &state.count)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Decrements the [`PendingWork`] counter when dropped.
pub struct PendingWorkGuard {
    work: PendingWork,
}

impl Drop for PendingWorkGuard {
    fn drop(&mut self) {
        // The guard owns one increment, so this cannot underflow.
        let _ = self.work.decrement();
    }
}

impl fmt::Debug for PendingWorkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWorkGuard").finish_non_exhaustive()
    }
}

/// Future returned by [`PendingWork::when_stable`].
#[must_use = "futures do nothing unless polled"]
pub struct WhenStable {
    work: PendingWork,
    epoch: u64,
    waiter: Option<u64>,
}

impl Future for WhenStable {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.work.inner.lock();
        if state.count == 0 || state.epoch != this.epoch {
            if let Some(id) = this.waiter.take() {
                state.waiters.remove(&id);
            }
            return Poll::Ready(());
        }

        let id = *this.waiter.get_or_insert_with(|| {
            state.next_waiter += 1;
            state.next_waiter
        });
        let registered = state
            .waiters
            .get(&id)
            .is_some_and(|waker| waker.will_wake(cx.waker()));
        if !registered {
            state.waiters.insert(id, cx.waker().clone());
        }
        Poll::Pending
    }
}

impl Drop for WhenStable {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.work.inner.lock().waiters.remove(&id);
        }
    }
}

impl fmt::Debug for WhenStable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenStable")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::time::Duration;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once(future: &mut WhenStable, waker: &Waker) -> Poll<()> {
        let mut cx = Context::from_waker(waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn test_increment_and_decrement() {
        let work = PendingWork::new();
        assert!(work.is_stable());

        work.increment();
        work.increment();
        assert_eq!(work.count(), 2);

        work.decrement().unwrap();
        work.decrement().unwrap();
        assert!(work.is_stable());
    }

    #[test]
    fn test_decrement_below_zero_fails() {
        let work = PendingWork::new();
        assert!(matches!(work.decrement(), Err(Error::InvalidArgument(_))));
        assert_eq!(work.count(), 0);
    }

    #[test]
    fn test_guard_settles_on_drop() {
        let work = PendingWork::new();
        {
            let _a = work.track();
            let _b = work.track();
            assert_eq!(work.count(), 2);
        }
        assert!(work.is_stable());
    }

    #[test]
    fn test_ready_immediately_when_stable() {
        let work = PendingWork::new();
        let mut stable = work.when_stable();
        assert_eq!(
            poll_once(&mut stable, &futures::task::noop_waker()),
            Poll::Ready(())
        );
    }

    #[test]
    fn test_resolves_only_after_decrement() {
        let work = PendingWork::new();
        work.increment();

        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut stable = work.when_stable();

        assert_eq!(poll_once(&mut stable, &waker), Poll::Pending);
        assert_eq!(poll_once(&mut stable, &waker), Poll::Pending);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        work.decrement().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(poll_once(&mut stable, &waker), Poll::Ready(()));
    }

    #[test]
    fn test_resolves_if_zero_was_reached_before_poll() {
        let work = PendingWork::new();
        work.increment();
        let mut stable = work.when_stable();

        work.decrement().unwrap();
        work.increment();

        assert_eq!(
            poll_once(&mut stable, &futures::task::noop_waker()),
            Poll::Ready(())
        );
    }

    #[test]
    fn test_not_woken_by_partial_progress() {
        let work = PendingWork::new();
        work.increment();
        work.increment();

        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut stable = work.when_stable();
        assert_eq!(poll_once(&mut stable, &waker), Poll::Pending);

        work.decrement().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert_eq!(poll_once(&mut stable, &waker), Poll::Pending);
    }

    #[test]
    fn test_dropped_waiters_are_unregistered() {
        let work = PendingWork::new();
        work.increment();
        let waker = futures::task::noop_waker();

        for _ in 0..100 {
            let mut stable = work.when_stable();
            assert_eq!(poll_once(&mut stable, &waker), Poll::Pending);
            assert_eq!(poll_once(&mut stable, &waker), Poll::Pending);
        }
        assert_eq!(work.inner.lock().waiters.len(), 0);

        let mut kept = work.when_stable();
        assert_eq!(poll_once(&mut kept, &waker), Poll::Pending);
        assert_eq!(work.inner.lock().waiters.len(), 1);
    }

    #[test]
    fn test_repoll_replaces_waker() {
        let work = PendingWork::new();
        work.increment();

        let first = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let second = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let mut stable = work.when_stable();
        assert_eq!(poll_once(&mut stable, &Waker::from(Arc::clone(&first))), Poll::Pending);
        assert_eq!(poll_once(&mut stable, &Waker::from(Arc::clone(&second))), Poll::Pending);
        assert_eq!(work.inner.lock().waiters.len(), 1);

        work.decrement().unwrap();
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_when_stable_across_tasks() {
        let work = PendingWork::new();
        let guard = work.track();

        let done = Arc::new(AtomicUsize::new(0));
        let done2 = Arc::clone(&done);
        let stable = work.when_stable();
        let waiter = tokio::spawn(async move {
            stable.await;
            done2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(done.load(Ordering::SeqCst), 0);

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
