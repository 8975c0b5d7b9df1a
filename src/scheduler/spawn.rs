//! Futures driven by the microtask queue.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use super::Scheduler;
use crate::error::{Error, Result};
use crate::task::{Callback, TaskId};

/// Type-erased boxed future.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct ResultSlot<T> {
    value: Option<T>,
    complete: bool,
    waker: Option<Waker>,
}

/// Handle to a future spawned on a [`Scheduler`].
///
/// The handle can be polled as a future itself, or inspected synchronously
/// after a drain.
pub struct JoinHandle<T> {
    /// Identifier of the spawned future.
    pub id: TaskId,
    result: Arc<Mutex<ResultSlot<T>>>,
}

impl<T> JoinHandle<T> {
    /// Tries to get the result if the future has completed.
    #[must_use]
    pub fn try_get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.result.lock().value.clone()
    }

    /// Takes the result if the future has completed.
    ///
    /// Returns `None` if it hasn't completed yet or the result was already taken.
    #[must_use]
    pub fn take(&self) -> Option<T> {
        self.result.lock().value.take()
    }

    /// Returns true if the future has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.result.lock().complete
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.result.lock();
        if slot.complete {
            Poll::Ready(slot.value.take())
        } else {
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("is_complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

/// A spawned future and its poll bookkeeping.
///
/// A pending future and its waker keep each other alive, so the scheduler
/// also tracks it by id and drops the future when the scope ends.
pub(super) struct Spawned {
    id: TaskId,
    future: Mutex<Option<BoxFuture>>,
    /// A poll microtask is already queued.
    queued: AtomicBool,
    /// Aborted while a poll was running.
    aborted: AtomicBool,
}

impl Spawned {
    fn schedule(self: &Arc<Self>, scheduler: &Scheduler) -> Result<()> {
        if self.queued.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let task = Arc::clone(self);
        let owner = scheduler.clone();
        let queued = scheduler.push_microtask(Callback::once(move || task.poll(&owner)));
        if queued.is_err() {
            self.queued.store(false, Ordering::Release);
        }
        queued.map(|_| ())
    }

    fn poll(self: &Arc<Self>, scheduler: &Scheduler) {
        self.queued.store(false, Ordering::Release);
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else { return };

        let waker = Waker::from(Arc::new(SpawnWaker {
            task: Arc::clone(self),
            scheduler: scheduler.clone(),
        }));
        let mut cx = Context::from_waker(&waker);
        let finished = if future.as_mut().poll(&mut cx).is_ready() {
            tracing::trace!(event = "scheduler.spawn.complete", task = %self.id, "Spawned future completed");
            scheduler.inner.state.lock().spawned.remove(&self.id);
            slot.take()
        } else if self.aborted.load(Ordering::Acquire)
            || !scheduler.inner.state.lock().scope_active
        {
            // Aborted, or the scope ended, while this poll was running.
            slot.take()
        } else {
            None
        };
        drop(slot);
        drop(finished);
    }
}

/// Waker that queues another poll microtask.
struct SpawnWaker {
    task: Arc<Spawned>,
    scheduler: Scheduler,
}

impl Wake for SpawnWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        // Wakes after the scope has ended are dropped.
        let _ = self.task.schedule(&self.scheduler);
    }
}

impl Scheduler {
    /// Spawns a future whose polls run as microtasks.
    ///
    /// The first poll is queued immediately; every wake queues another one.
    ///
    /// # Errors
    ///
    /// [`Error::ScopeNotActive`](crate::Error::ScopeNotActive) outside a scope.
    pub fn spawn<F, T>(&self, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let result = Arc::new(Mutex::new(ResultSlot {
            value: None,
            complete: false,
            waker: None,
        }));
        let slot = Arc::clone(&result);
        let id = self.spawn_boxed(Box::pin(async move {
            let output = future.await;
            let waker = {
                let mut slot = slot.lock();
                slot.value = Some(output);
                slot.complete = true;
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }))?;
        Ok(JoinHandle { id, result })
    }

    pub(crate) fn spawn_boxed(&self, future: BoxFuture) -> Result<TaskId> {
        let id = TaskId::next();
        let task = Arc::new(Spawned {
            id,
            future: Mutex::new(Some(future)),
            queued: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        });
        {
            let mut state = self.inner.state.lock();
            if !state.scope_active {
                return Err(Error::ScopeNotActive);
            }
            state.spawned.insert(id, Arc::downgrade(&task));
        }
        if let Err(error) = task.schedule(self) {
            self.inner.state.lock().spawned.remove(&id);
            return Err(error);
        }
        tracing::trace!(event = "scheduler.spawn", task = %id, "Future spawned");
        Ok(id)
    }

    /// Drops a spawned future before it completes. Returns `true` if it was
    /// still pending.
    pub(crate) fn abort_spawned(&self, id: TaskId) -> bool {
        let tracked = self.inner.state.lock().spawned.remove(&id);
        let Some(task) = tracked.and_then(|task| task.upgrade()) else {
            return false;
        };
        task.aborted.store(true, Ordering::Release);
        tracing::trace!(event = "scheduler.spawn.abort", task = %id, "Spawned future aborted");
        // A future aborting itself is dropped once its poll returns.
        let Some(mut slot) = task.future.try_lock() else {
            return true;
        };
        let future = slot.take();
        drop(slot);
        future.is_some()
    }

    /// Drops every spawned future that has not completed. Returns how many
    /// were dropped.
    ///
    /// Called at teardown, after the scope has been marked inactive.
    pub(crate) fn abandon_spawned(&self) -> usize {
        let tracked: Vec<_> = self.inner.state.lock().spawned.drain().collect();
        let mut dropped = 0;
        for (id, task) in tracked {
            let Some(task) = task.upgrade() else { continue };
            // A future being polled right now drops itself once the poll returns.
            let Some(mut slot) = task.future.try_lock() else { continue };
            let future = slot.take();
            drop(slot);
            if future.is_some() {
                tracing::trace!(event = "scheduler.spawn.abandon", task = %id, "Spawned future dropped");
                dropped += 1;
            }
            drop(future);
        }
        dropped
    }
}
