//! Ledger session models.
//!
//! A `LedgerSession` is one completed timed interval waiting for
//! consolidation. Duration is signed: positive minutes count forward,
//! negative minutes count backward; the interval itself always spans
//! `abs(duration_minutes)` on the clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Counting direction of a session. Zero-length sessions count as forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn from_number(value: f64) -> Self {
        if value < 0.0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }

    pub fn signum(self) -> f64 {
        self.as_i32() as f64
    }
}

// Canonical wire encoding is a plain signed integer. Decoding accepts any
// JSON number (historical snapshots wrote the direction as a float) and
// normalizes on sign; everything else is a decode error.
impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Ok(Direction::from_number(raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSession {
    pub id: i64,
    pub device_uuid: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: f64,
}

impl LedgerSession {
    pub fn direction(&self) -> Direction {
        Direction::from_number(self.duration_minutes)
    }

    pub fn hours(&self) -> f64 {
        self.duration_minutes / 60.0
    }

    /// Clock end of the interval, independent of counting direction.
    pub fn end_time(&self) -> DateTime<Utc> {
        let millis = (self.duration_minutes.abs() * 60_000.0).round() as i64;
        self.start_time + Duration::milliseconds(millis)
    }

    /// Shorten (or extend) the interval to end at `end`, preserving the
    /// counting direction encoded in the duration sign.
    pub fn set_end_time(&mut self, end: DateTime<Utc>) {
        let elapsed_minutes = (end - self.start_time).num_milliseconds() as f64 / 60_000.0;
        self.duration_minutes = elapsed_minutes.max(0.0) * self.direction().signum();
    }
}
