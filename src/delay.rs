//! Conversion of delay and tick arguments into virtual durations.
//!
//! Bare integers are read as milliseconds. Signed integers are accepted so
//! that a negative amount is reported as [`Error::InvalidArgument`] instead
//! of being silently wrapped.

use std::time::Duration;

use crate::error::{Error, Result};

/// A value that can be used as a delay, interval or tick amount.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_vtime::IntoDelay;
///
/// assert_eq!(10.into_delay().unwrap(), Duration::from_millis(10));
/// assert_eq!(Duration::from_secs(1).into_delay().unwrap(), Duration::from_secs(1));
/// assert!((-5).into_delay().is_err());
/// ```
pub trait IntoDelay {
    /// Converts the value, failing with [`Error::InvalidArgument`] if negative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for negative amounts.
    fn into_delay(self) -> Result<Duration>;
}

impl IntoDelay for Duration {
    fn into_delay(self) -> Result<Duration> {
        Ok(self)
    }
}

macro_rules! unsigned_millis {
    ($($ty:ty),*) => {
        $(
            impl IntoDelay for $ty {
                fn into_delay(self) -> Result<Duration> {
                    Ok(Duration::from_millis(u64::from(self)))
                }
            }
        )*
    };
}

macro_rules! signed_millis {
    ($($ty:ty),*) => {
        $(
            impl IntoDelay for $ty {
                fn into_delay(self) -> Result<Duration> {
                    u64::try_from(self)
                        .map(Duration::from_millis)
                        .map_err(|_| Error::invalid_argument(format!("negative amount: {self}ms")))
                }
            }
        )*
    };
}

unsigned_millis!(u8, u16, u32, u64);
signed_millis!(i8, i16, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_literal_is_millis() {
        assert_eq!(250.into_delay().unwrap(), Duration::from_millis(250));
        assert_eq!(0.into_delay().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_unsigned_is_millis() {
        assert_eq!(7u64.into_delay().unwrap(), Duration::from_millis(7));
    }

    #[test]
    fn test_negative_is_rejected() {
        let err = (-1i64).into_delay().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("-1ms"));
    }

    #[test]
    fn test_duration_passes_through() {
        let d = Duration::from_micros(1500);
        assert_eq!(d.into_delay().unwrap(), d);
    }
}
