//! Wall-clock timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// A Unix timestamp in fractional seconds.
///
/// Messages, check results and replay-log records all carry one of these;
/// keeping it as a newtype (rather than a bare `f64`) stops a raw duration
/// or a count from being passed where a point in time is expected.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(dur.as_secs_f64())
    }

    /// Builds a timestamp from raw Unix seconds (used in tests and when
    /// replaying persisted/replicated values).
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Whether `self` is strictly newer than `other` — the last-writer-wins
    /// comparison used throughout the cluster router (§5 ordering
    /// guarantees).
    pub fn is_newer_than(self, other: Timestamp) -> bool {
        self.0 > other.0
    }
}

impl std::ops::Add<f64> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: f64) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl std::ops::Sub for Timestamp {
    type Output = f64;

    fn sub(self, rhs: Timestamp) -> f64 {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_than_is_strict() {
        let a = Timestamp::from_secs(10.0);
        let b = Timestamp::from_secs(10.0);
        assert!(!a.is_newer_than(b));
        assert!((a + 0.001).is_newer_than(b));
    }
}
