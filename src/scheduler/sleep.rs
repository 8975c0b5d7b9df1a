//! Sleep and timeout futures driven by virtual time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::Mutex;
use pin_project::{pin_project, pinned_drop};

use super::Scheduler;
use crate::clock::VirtualInstant;
use crate::delay::IntoDelay;
use crate::error::{Error, Result};
use crate::task::{Callback, TaskId};

#[derive(Debug, Default)]
struct SleepSlot {
    fired: bool,
    waker: Option<Waker>,
}

/// A future that completes when virtual time reaches its deadline.
///
/// Created by [`Scheduler::sleep`]. The deadline is registered as a macrotask
/// when the sleep is created; dropping an unfinished sleep cancels it.
#[pin_project(PinnedDrop)]
#[derive(Debug)]
pub struct VirtualSleep {
    scheduler: Scheduler,
    id: TaskId,
    deadline: Duration,
    slot: Arc<Mutex<SleepSlot>>,
}

impl VirtualSleep {
    pub(crate) fn new(scheduler: &Scheduler, duration: Duration) -> Result<Self> {
        let deadline = scheduler.due_after(duration)?;
        let slot = Arc::new(Mutex::new(SleepSlot::default()));
        let fire = Arc::clone(&slot);
        let id = scheduler.push_macrotask(
            TaskId::next(),
            duration,
            None,
            Callback::once(move || {
                let waker = {
                    let mut slot = fire.lock();
                    slot.fired = true;
                    slot.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            }),
        )?;
        Ok(Self {
            scheduler: scheduler.clone(),
            id,
            deadline,
            slot,
        })
    }

    /// Returns the deadline for this sleep.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Returns the virtual time left until the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.scheduler.now())
    }

    /// Returns `true` once the deadline macrotask has fired.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.slot.lock().fired
    }

    /// Returns the id of the macrotask backing this sleep.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

impl Future for VirtualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        if slot.fired {
            Poll::Ready(())
        } else {
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[pinned_drop]
impl PinnedDrop for VirtualSleep {
    fn drop(self: Pin<&mut Self>) {
        if !self.slot.lock().fired {
            self.scheduler.cancel(self.id);
        }
    }
}

/// A future that fails with [`Error::Timeout`] if `future` does not complete
/// within a virtual duration.
///
/// Created by [`Scheduler::timeout`].
#[pin_project]
#[derive(Debug)]
pub struct VirtualTimeout<F> {
    #[pin]
    future: F,
    #[pin]
    sleep: VirtualSleep,
    duration: Duration,
}

impl<F: Future> Future for VirtualTimeout<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(output) = this.future.poll(cx) {
            return Poll::Ready(Ok(output));
        }
        match this.sleep.poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Error::Timeout(*this.duration))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Scheduler {
    /// Creates a future that completes once `duration` of virtual time passes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a negative duration or one that
    /// overflows virtual time, [`Error::ScopeNotActive`] outside a scope.
    pub fn sleep<D: IntoDelay>(&self, duration: D) -> Result<VirtualSleep> {
        VirtualSleep::new(self, duration.into_delay()?)
    }

    /// Creates a future that completes once virtual time reaches `deadline`.
    ///
    /// A deadline that has already passed completes on the next drain.
    ///
    /// # Errors
    ///
    /// [`Error::ScopeNotActive`] outside a scope.
    pub fn sleep_until(&self, deadline: VirtualInstant) -> Result<VirtualSleep> {
        let remaining = deadline.saturating_duration_since(self.now_instant());
        VirtualSleep::new(self, remaining)
    }

    /// Wraps `future` so it fails with [`Error::Timeout`] unless it completes
    /// within `duration` of virtual time.
    ///
    /// # Errors
    ///
    /// Same as [`sleep`](Scheduler::sleep).
    pub fn timeout<D, F>(&self, duration: D, future: F) -> Result<VirtualTimeout<F>>
    where
        D: IntoDelay,
        F: Future,
    {
        let duration = duration.into_delay()?;
        Ok(VirtualTimeout {
            future,
            sleep: VirtualSleep::new(self, duration)?,
            duration,
        })
    }
}
