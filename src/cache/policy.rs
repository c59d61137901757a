//! Shared cache timing policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheError, Result};

/// Timing policy shared by every cache manager and the cleaner.
///
/// ```rust
/// # use tenant_cache::CachePolicy;
/// # use std::time::Duration;
/// let policy = CachePolicy::new()
///     .fresh_time(Duration::from_secs(60))
///     .dormant_time(Duration::from_secs(600))
///     .clean_interval(Duration::from_secs(30));
/// assert!(policy.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// How long a loaded value is served without re-validation. Default: 5 minutes.
    #[serde(rename = "fresh_time_ms", with = "millis")]
    pub fresh_time: Duration,
    /// How long since last access before an entry may be evicted. Default: 30 minutes.
    #[serde(rename = "dormant_time_ms", with = "millis")]
    pub dormant_time: Duration,
    /// Period between automatic sweeps. Default: 1 minute.
    #[serde(rename = "clean_interval_ms", with = "millis")]
    pub clean_interval: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            fresh_time: Duration::from_secs(5 * 60),
            dormant_time: Duration::from_secs(30 * 60),
            clean_interval: Duration::from_secs(60),
        }
    }
}

impl CachePolicy {
    /// Create a policy with the default durations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from plain millisecond values.
    pub fn from_millis(fresh_ms: u64, dormant_ms: u64, clean_interval_ms: u64) -> Self {
        Self {
            fresh_time: Duration::from_millis(fresh_ms),
            dormant_time: Duration::from_millis(dormant_ms),
            clean_interval: Duration::from_millis(clean_interval_ms),
        }
    }

    /// Set the freshness window.
    pub fn fresh_time(mut self, d: Duration) -> Self {
        self.fresh_time = d;
        self
    }

    /// Set the dormancy threshold.
    pub fn dormant_time(mut self, d: Duration) -> Self {
        self.dormant_time = d;
        self
    }

    /// Set the sweep interval.
    pub fn clean_interval(mut self, d: Duration) -> Self {
        self.clean_interval = d;
        self
    }

    /// Check the policy invariants.
    ///
    /// An entry must not become dormant while still fresh, and the sweep
    /// interval must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.dormant_time < self.fresh_time {
            return Err(CacheError::Configuration(format!(
                "dormant time ({:?}) must not be shorter than fresh time ({:?})",
                self.dormant_time, self.fresh_time
            )));
        }
        if self.clean_interval.is_zero() {
            return Err(CacheError::Configuration(
                "clean interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let policy = CachePolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.clean_interval, Duration::from_secs(60));
    }

    #[test]
    fn dormant_shorter_than_fresh_is_rejected() {
        let policy = CachePolicy::from_millis(1_000, 500, 100);
        let err = policy.validate().unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn dormant_equal_to_fresh_is_allowed() {
        assert!(CachePolicy::from_millis(500, 500, 100).validate().is_ok());
    }

    #[test]
    fn zero_clean_interval_is_rejected() {
        let policy = CachePolicy::from_millis(100, 500, 0);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn serializes_as_millis() {
        let policy = CachePolicy::from_millis(100, 500, 50);
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json["fresh_time_ms"], 100);
        assert_eq!(json["dormant_time_ms"], 500);
        assert_eq!(json["clean_interval_ms"], 50);
    }
}
