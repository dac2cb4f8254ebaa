//! Core scalar types: segment ids, timestamps, log generations.

use crate::error::CoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a revision segment.
///
/// Segment ids are allocated from one global counter, strictly increase
/// with allocation order and are never reused. `MAIN` owns segment 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// The segment owned by `MAIN` when the repository is created.
    pub const MAIN: Self = Self(0);

    /// Creates a segment id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// Commit timestamp in milliseconds since the Unix epoch.
///
/// Timestamps come from [`TimestampClock`] and are unique across the
/// whole repository, so they also order commits between branches.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The timestamp before any commit.
    pub const ZERO: Self = Self(0);

    /// The largest representable timestamp.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a timestamp.
    #[must_use]
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Formats the timestamp as RFC 3339 for display.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        i64::try_from(self.0)
            .ok()
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
            .map_or_else(|| self.0.to_string(), |dt| dt.to_rfc3339())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepts raw milliseconds or an RFC 3339 date.
impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(millis) = s.parse::<u64>() {
            return Ok(Self(millis));
        }
        let parsed = chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|e| CoreError::bad_request(format!("invalid timestamp '{s}': {e}")))?;
        u64::try_from(parsed.timestamp_millis())
            .map(Self)
            .map_err(|_| CoreError::bad_request(format!("timestamp '{s}' predates 1970")))
    }
}

/// Generation of the write-ahead log.
///
/// Every durability checkpoint rolls the log to the next generation and
/// the document store records the generation it has absorbed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// Creates a generation.
    #[must_use]
    pub const fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// Returns the raw generation.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen:{}", self.0)
    }
}

/// Repository-wide commit clock.
///
/// Hands out `max(wall clock, last + 1)`, so timestamps strictly increase
/// even when the wall clock stalls or steps backwards.
#[derive(Debug, Default)]
pub struct TimestampClock {
    last: Mutex<u64>,
}

impl TimestampClock {
    /// Creates a clock that never issues a value at or below `floor`.
    #[must_use]
    pub fn new(floor: Timestamp) -> Self {
        Self {
            last: Mutex::new(floor.0),
        }
    }

    /// Allocates the next timestamp.
    pub fn next(&self) -> Timestamp {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let mut last = self.last.lock();
        *last = now.max(*last + 1);
        Timestamp(*last)
    }

    /// Raises the floor after recovery replays newer commits.
    pub fn observe(&self, ts: Timestamp) {
        let mut last = self.last.lock();
        *last = (*last).max(ts.0);
    }

    /// The most recently issued or observed timestamp.
    #[must_use]
    pub fn last(&self) -> Timestamp {
        Timestamp(*self.last.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_parse_from_millis_or_rfc3339() {
        assert_eq!("1500".parse::<Timestamp>().unwrap(), Timestamp::new(1500));
        let ts: Timestamp = "1970-01-01T00:00:02.5+00:00".parse().unwrap();
        assert_eq!(ts, Timestamp::new(2500));
        assert!("1969-12-31T23:59:59Z".parse::<Timestamp>().is_err());
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    #[test]
    fn clock_is_strictly_monotonic() {
        let clock = TimestampClock::default();
        let mut prev = clock.next();
        for _ in 0..1000 {
            let ts = clock.next();
            assert!(ts > prev);
            prev = ts;
        }
    }

    #[test]
    fn clock_respects_floor() {
        let far_future = Timestamp::new(u64::MAX / 2);
        let clock = TimestampClock::new(far_future);
        assert_eq!(clock.next(), Timestamp::new(far_future.as_u64() + 1));
    }

    #[test]
    fn observe_only_raises() {
        let clock = TimestampClock::new(Timestamp::new(100));
        clock.observe(Timestamp::new(50));
        assert_eq!(clock.last(), Timestamp::new(100));
        clock.observe(Timestamp::new(500));
        assert_eq!(clock.last(), Timestamp::new(500));
    }

    #[test]
    fn generation_next() {
        assert_eq!(Generation::new(4).next().as_u64(), 5);
        assert_eq!(format!("{}", SegmentId::MAIN), "seg:0");
    }
}
