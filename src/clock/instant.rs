//! Virtual instants.

use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

use super::VirtualClock;

/// A point in virtual time.
///
/// Mirrors [`std::time::Instant`] but reads a [`VirtualClock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualInstant {
    inner: Duration,
}

impl VirtualInstant {
    /// Returns the clock's current time as an instant.
    #[must_use]
    pub fn now(clock: &VirtualClock) -> Self {
        Self { inner: clock.now() }
    }

    /// Returns the time elapsed from `earlier` to `self`.
    ///
    /// # Panics
    ///
    /// Panics if `earlier` is later than `self`.
    #[must_use]
    pub fn duration_since(&self, earlier: VirtualInstant) -> Duration {
        self.checked_duration_since(earlier)
            .expect("earlier instant is later than self")
    }

    /// Returns the time elapsed from `earlier` to `self`, or `None` if
    /// `earlier` is later.
    #[must_use]
    pub fn checked_duration_since(&self, earlier: VirtualInstant) -> Option<Duration> {
        self.inner.checked_sub(earlier.inner)
    }

    /// Like [`duration_since`](Self::duration_since) but returns zero instead of panicking.
    #[must_use]
    pub fn saturating_duration_since(&self, earlier: VirtualInstant) -> Duration {
        self.checked_duration_since(earlier).unwrap_or(Duration::ZERO)
    }

    /// Returns the virtual time elapsed since this instant.
    #[must_use]
    pub fn elapsed(&self, clock: &VirtualClock) -> Duration {
        VirtualInstant::now(clock).saturating_duration_since(*self)
    }

    /// Returns the instant as an offset from virtual time zero.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        self.inner
    }
}

impl Add<Duration> for VirtualInstant {
    type Output = VirtualInstant;

    fn add(self, other: Duration) -> VirtualInstant {
        VirtualInstant {
            inner: self.inner + other,
        }
    }
}

impl AddAssign<Duration> for VirtualInstant {
    fn add_assign(&mut self, other: Duration) {
        *self = *self + other;
    }
}

impl Sub<VirtualInstant> for VirtualInstant {
    type Output = Duration;

    fn sub(self, other: VirtualInstant) -> Duration {
        self.duration_since(other)
    }
}
