use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, warn};
use rusqlite::{params, Connection, Row};

use crate::consolidate::merged_net_hours;
use crate::db::{
    helpers::{format_datetime, parse_datetime},
    models::LedgerSession,
    Database,
};

fn row_to_session(row: &Row) -> Result<LedgerSession> {
    let start_time: String = row.get("start_time")?;
    Ok(LedgerSession {
        id: row.get("id")?,
        device_uuid: row.get("device_uuid")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        duration_minutes: row.get("duration_minutes")?,
    })
}

fn load_sessions_ordered(conn: &Connection) -> Result<Vec<LedgerSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, device_uuid, start_time, duration_minutes
         FROM sessions
         ORDER BY start_time ASC",
    )?;

    let mut rows = stmt.query([])?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

impl Database {
    pub async fn insert_session(
        &self,
        device_uuid: &str,
        start_time: DateTime<Utc>,
        duration_minutes: f64,
    ) -> Result<i64> {
        let device_uuid = device_uuid.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (device_uuid, start_time, duration_minutes)
                 VALUES (?1, ?2, ?3)",
                params![device_uuid, format_datetime(start_time), duration_minutes],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Best-effort ledger write: a failed insert is logged and swallowed so
    /// local timing keeps working (the interval is lost, never duplicated).
    pub async fn append_session(
        &self,
        device_uuid: &str,
        start_time: DateTime<Utc>,
        duration_minutes: f64,
    ) {
        if let Err(err) = self
            .insert_session(device_uuid, start_time, duration_minutes)
            .await
        {
            error!("Failed to append session for {device_uuid}: {err:#}");
        }
    }

    /// All ledger sessions across every device, ordered by start time.
    pub async fn list_sessions_ordered(&self) -> Result<Vec<LedgerSession>> {
        self.execute(|conn| load_sessions_ordered(conn)).await
    }

    pub async fn list_sessions_for_device(&self, device_uuid: &str) -> Result<Vec<LedgerSession>> {
        let device_uuid = device_uuid.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, device_uuid, start_time, duration_minutes
                 FROM sessions
                 WHERE device_uuid = ?1
                 ORDER BY start_time ASC",
            )?;

            let mut rows = stmt.query(params![device_uuid])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn update_session_minutes(&self, id: i64, duration_minutes: f64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions SET duration_minutes = ?1 WHERE id = ?2",
                params![duration_minutes, id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    /// The accumulated total in hours: every device's folded base plus the
    /// net duration of the merged, non-overlapping ledger sessions. If the
    /// ledger cannot be read the device totals alone are returned.
    pub async fn total_time(&self) -> Result<f64> {
        self.execute(|conn| {
            let mut total: f64 = conn.query_row(
                "SELECT COALESCE(SUM(base_hours), 0) FROM devices",
                [],
                |row| row.get(0),
            )?;

            match load_sessions_ordered(conn) {
                Ok(sessions) => total += merged_net_hours(sessions),
                Err(err) => {
                    warn!("total_time: ledger unreadable, using device totals only: {err:#}");
                }
            }

            Ok(total)
        })
        .await
    }
}
