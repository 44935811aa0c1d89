//! Connection deadlines

use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

/// How long a single blocking socket operation may take.
///
/// An unset deadline leaves sockets in plain blocking mode, exactly as if
/// no deadline support were installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Deadline(Option<Duration>);

impl Deadline {
    /// No limit.
    pub const UNSET: Deadline = Deadline(None);

    /// Deadline from a non-zero duration.
    pub fn new(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::InvalidDeadline(0.0));
        }
        Ok(Deadline(Some(timeout)))
    }

    /// Deadline from fractional seconds, the unit callers configure in.
    ///
    /// # Examples
    /// ```
    /// use timeout_conn::Deadline;
    ///
    /// let deadline = Deadline::from_secs_f64(2.5).unwrap();
    /// assert_eq!(deadline.as_secs_f64(), Some(2.5));
    /// assert!(Deadline::from_secs_f64(0.0).is_err());
    /// ```
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(Error::InvalidDeadline(secs));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|_| Error::InvalidDeadline(secs))
            .and_then(Self::new)
    }

    /// Optional seconds; `None` means unset.
    pub fn from_optional_secs(secs: Option<f64>) -> Result<Self> {
        secs.map_or(Ok(Deadline::UNSET), Self::from_secs_f64)
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    pub fn as_secs_f64(&self) -> Option<f64> {
        self.0.map(|d| d.as_secs_f64())
    }

    /// This deadline if set, otherwise `fallback`.
    pub fn or(self, fallback: Deadline) -> Deadline {
        if self.is_set() {
            self
        } else {
            fallback
        }
    }
}

impl From<Duration> for Deadline {
    /// A zero duration maps to an unset deadline.
    fn from(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Deadline::UNSET
        } else {
            Deadline(Some(timeout))
        }
    }
}

impl From<Option<Duration>> for Deadline {
    fn from(timeout: Option<Duration>) -> Self {
        timeout.map_or(Deadline::UNSET, Deadline::from)
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(d) => write!(f, "{:.3}s", d.as_secs_f64()),
            None => f.write_str("unset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive() {
        assert!(Deadline::from_secs_f64(0.0).is_err());
        assert!(Deadline::from_secs_f64(-1.0).is_err());
        assert!(Deadline::from_secs_f64(f64::NAN).is_err());
        assert!(Deadline::from_secs_f64(f64::INFINITY).is_err());
        assert!(Deadline::new(Duration::ZERO).is_err());
    }

    #[test]
    fn test_fractional_seconds() {
        let d = Deadline::from_secs_f64(0.25).unwrap();
        assert_eq!(d.duration(), Some(Duration::from_millis(250)));
        assert_eq!(d.to_string(), "0.250s");
    }

    #[test]
    fn test_fallback() {
        let class_default = Deadline::from_secs_f64(10.0).unwrap();
        let explicit = Deadline::from_secs_f64(3.0).unwrap();

        assert_eq!(Deadline::UNSET.or(class_default), class_default);
        assert_eq!(explicit.or(class_default), explicit);
        assert_eq!(Deadline::UNSET.or(Deadline::UNSET), Deadline::UNSET);
    }

    #[test]
    fn test_optional_secs() {
        assert_eq!(Deadline::from_optional_secs(None).unwrap(), Deadline::UNSET);
        assert!(Deadline::from_optional_secs(Some(5.0)).unwrap().is_set());
        assert_eq!(Deadline::from(Duration::ZERO), Deadline::UNSET);
    }
}
