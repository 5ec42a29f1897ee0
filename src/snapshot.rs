//! Wire format for the shared-storage backend.
//!
//! Two file categories live in the shared folder: `<uuid>.json` history
//! snapshots (base hours plus pending ledger sessions) and
//! `<uuid>_active.json` active-session records. Timestamps travel as epoch
//! seconds and round-trip at millisecond precision, since start times double
//! as the join key during reconciliation.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Direction, LedgerSession};

const ACTIVE_SUFFIX: &str = "_active.json";
const HISTORY_SUFFIX: &str = ".json";

pub fn history_file_name(device_uuid: &str) -> String {
    format!("{device_uuid}{HISTORY_SUFFIX}")
}

pub fn active_file_name(device_uuid: &str) -> String {
    format!("{device_uuid}{ACTIVE_SUFFIX}")
}

/// If `name` is an active-session file, the owning device uuid.
pub fn device_from_active_file(name: &str) -> Option<&str> {
    name.strip_suffix(ACTIVE_SUFFIX).filter(|s| !s.is_empty())
}

/// If `name` is a history snapshot, the owning device uuid.
pub fn device_from_history_file(name: &str) -> Option<&str> {
    if device_from_active_file(name).is_some() {
        return None;
    }
    name.strip_suffix(HISTORY_SUFFIX).filter(|s| !s.is_empty())
}

mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn to_timestamp(value: DateTime<Utc>) -> f64 {
        value.timestamp_millis() as f64 / 1000.0
    }

    pub fn from_timestamp(raw: f64) -> Option<DateTime<Utc>> {
        if !raw.is_finite() {
            return None;
        }
        DateTime::from_timestamp_millis((raw * 1000.0).round() as i64)
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_timestamp(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        from_timestamp(raw).ok_or_else(|| D::Error::custom(format!("timestamp {raw} out of range")))
    }
}

mod epoch_seconds_opt {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_some(&super::epoch_seconds::to_timestamp(*dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(raw) => super::epoch_seconds::from_timestamp(raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp {raw} out of range"))),
            None => Ok(None),
        }
    }
}

/// One ledger session as carried inside a history snapshot. The local row
/// id never travels; start time identifies the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSession {
    #[serde(with = "epoch_seconds")]
    pub start_time: DateTime<Utc>,
    pub minutes: f64,
}

impl From<&LedgerSession> for SnapshotSession {
    fn from(session: &LedgerSession) -> Self {
        Self {
            start_time: session.start_time,
            minutes: session.duration_minutes,
        }
    }
}

/// A device's full exported state: `<uuid>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub uuid: String,
    pub base_hours: f64,
    pub sessions: Vec<SnapshotSession>,
}

impl DeviceSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to encode device snapshot")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to decode device snapshot")
    }
}

/// A currently (or recently) running session: `<uuid>_active.json`.
/// Presence of `end_time`, or deletion of the file, both signal the
/// session ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionFile {
    #[serde(with = "epoch_seconds")]
    pub start_time: DateTime<Utc>,
    pub direction: Direction,
    #[serde(
        with = "epoch_seconds_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
}

impl ActiveSessionFile {
    pub fn live(start_time: DateTime<Utc>, direction: Direction) -> Self {
        Self {
            start_time,
            direction,
            end_time: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.end_time.is_none()
    }

    /// Signed duration in minutes of the ended session, if the end lies
    /// after the start (anything else is a corrupt record).
    pub fn ended_minutes(&self) -> Option<f64> {
        let end = self.end_time?;
        if end <= self.start_time {
            return None;
        }
        let minutes = (end - self.start_time).num_milliseconds() as f64 / 60_000.0;
        Some(minutes * self.direction.signum())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to encode active-session record")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| anyhow!("failed to decode active-session record: {err}"))
    }
}
