//! ISO 8601 timestamp utilities for envelope and interaction bookkeeping.
//!
//! The wire format specifies `created`/`expires` as ISO 8601 strings; this
//! module wraps `chrono::DateTime<Utc>` so every layer works with a single
//! comparable, serializable timestamp type instead of ad-hoc string
//! handling. Internal TTL arithmetic (skew windows, sweep thresholds) is
//! expressed in whole seconds, same as the source document.

use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A UTC instant, serialized as an RFC 3339 / ISO 8601 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let parsed = DateTime::parse_from_rfc3339(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid ISO 8601 timestamp: {e}")))?;
        Ok(Timestamp(parsed.with_timezone(&Utc)))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0 + chrono::Duration::from_std(rhs).unwrap_or_default())
    }
}

impl Timestamp {
    /// The current instant.
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Seconds since the Unix epoch, truncated toward zero.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// `self + seconds`.
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Timestamp(self.0 + chrono::Duration::seconds(seconds))
    }

    /// Absolute difference between `self` and `other`, in seconds.
    pub fn abs_diff_seconds(&self, other: &Timestamp) -> i64 {
        (self.0 - other.0).num_seconds().abs()
    }

    /// Seconds elapsed from `self` until now. Negative if `self` is in the
    /// future.
    pub fn elapsed_seconds(&self) -> i64 {
        (Utc::now() - self.0).num_seconds()
    }

    /// Seconds elapsed from `earlier` until `self`. Negative if `earlier`
    /// is after `self`.
    pub fn elapsed_since(&self, earlier: &Timestamp) -> i64 {
        (self.0 - earlier.0).num_seconds()
    }

    /// True if `self` is strictly before `other`.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_rfc3339() {
        let ts = Timestamp::now();
        let s = ts.to_string();
        let parsed = DateTime::parse_from_rfc3339(&s).unwrap();
        assert_eq!(parsed.timestamp(), ts.as_unix_secs());
    }

    #[test]
    fn plus_seconds_moves_forward() {
        let ts = Timestamp::now();
        let later = ts.plus_seconds(60);
        assert!(ts.is_before(&later));
        assert_eq!(later.as_unix_secs() - ts.as_unix_secs(), 60);
    }

    #[test]
    fn elapsed_since_matches_plus_seconds() {
        let earlier = Timestamp::now();
        let later = earlier.plus_seconds(42);
        assert_eq!(later.elapsed_since(&earlier), 42);
    }

    #[test]
    fn skew_boundary_is_inclusive() {
        let now = Timestamp::now();
        let exactly_five_min = now.plus_seconds(-300);
        assert_eq!(now.abs_diff_seconds(&exactly_five_min), 300);
    }
}
