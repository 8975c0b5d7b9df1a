//! `VirtualClock` implementation.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A monotonic virtual clock.
///
/// All clones share the same time. Only the owning scheduler can move it,
/// and it never moves backwards.
///
/// # Example
///
/// ```rust
/// use testkit_vtime::clock::VirtualClock;
/// use std::time::Duration;
///
/// let clock = VirtualClock::with_start_time(Duration::from_secs(100));
/// assert_eq!(clock.now(), Duration::from_secs(100));
///
/// let clock2 = clock.clone();
/// assert_eq!(clock2.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct VirtualClock {
    start: Duration,
    now: Arc<Mutex<Duration>>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// Creates a clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_start_time(Duration::ZERO)
    }

    /// Creates a clock starting at the given time.
    #[must_use]
    pub fn with_start_time(start: Duration) -> Self {
        Self {
            start,
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        *self.now.lock()
    }

    /// Returns the virtual time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.now() - self.start
    }

    /// Moves the clock to `time` if it is later than the current time.
    ///
    /// Earlier times are ignored so the clock never rolls back.
    pub(crate) fn advance_to(&self, time: Duration) -> Duration {
        let mut now = self.now.lock();
        if time > *now {
            *now = time;
        }
        *now
    }
}
