use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Direction;

/// One row of the `devices` table: a participant in the shared total.
///
/// `base_hours` holds time already folded out of the ledger; the
/// active-session fields mirror the most recently synced remote state so a
/// freshly launched process can pick up a running session before its first
/// poll completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub uuid: String,
    pub base_hours: f64,
    pub active_session_since: Option<DateTime<Utc>>,
    pub active_session_direction: Option<Direction>,
    pub sync_cursor: Option<String>,
}
