use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{format_datetime, parse_optional_datetime, parse_optional_direction},
    models::{Device, Direction},
    Database,
};

fn row_to_device(row: &Row) -> Result<Device> {
    let active_since: Option<String> = row.get("active_session_since")?;
    let active_direction: Option<i64> = row.get("active_session_direction")?;

    Ok(Device {
        uuid: row.get("uuid")?,
        base_hours: row.get("base_hours")?,
        active_session_since: parse_optional_datetime(active_since, "active_session_since")?,
        active_session_direction: parse_optional_direction(active_direction),
        sync_cursor: row.get("sync_cursor")?,
    })
}

const DEVICE_COLUMNS: &str =
    "uuid, base_hours, active_session_since, active_session_direction, sync_cursor";

impl Database {
    /// Idempotent: inserts the row with `base_hours = 0` on first reference.
    pub async fn get_or_create_device(&self, uuid: &str) -> Result<Device> {
        let uuid = uuid.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO devices (uuid, base_hours) VALUES (?1, 0)",
                params![uuid],
            )?;

            let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE uuid = ?1");
            let mut stmt = conn.prepare(&query)?;
            let device = stmt.query_row(params![uuid], |row| Ok(row_to_device(row)))??;
            Ok(device)
        })
        .await
    }

    pub async fn get_device(&self, uuid: &str) -> Result<Option<Device>> {
        let uuid = uuid.to_string();
        self.execute(move |conn| {
            let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE uuid = ?1");
            let mut stmt = conn.prepare(&query)?;
            let device = stmt
                .query_row(params![uuid], |row| Ok(row_to_device(row)))
                .optional()?
                .transpose()?;
            Ok(device)
        })
        .await
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        self.execute(|conn| {
            let query = format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY uuid");
            let mut stmt = conn.prepare(&query)?;

            let mut rows = stmt.query([])?;
            let mut devices = Vec::new();
            while let Some(row) = rows.next()? {
                devices.push(row_to_device(row)?);
            }
            Ok(devices)
        })
        .await
    }

    pub async fn set_base_hours(&self, uuid: &str, base_hours: f64) -> Result<()> {
        let uuid = uuid.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE devices SET base_hours = ?1 WHERE uuid = ?2",
                params![base_hours, uuid],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_active_session(
        &self,
        uuid: &str,
        since: DateTime<Utc>,
        direction: Direction,
    ) -> Result<()> {
        let uuid = uuid.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE devices
                 SET active_session_since = ?1,
                     active_session_direction = ?2
                 WHERE uuid = ?3",
                params![format_datetime(since), direction.as_i32(), uuid],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn clear_active_session(&self, uuid: &str) -> Result<()> {
        let uuid = uuid.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE devices
                 SET active_session_since = NULL,
                     active_session_direction = NULL
                 WHERE uuid = ?1",
                params![uuid],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_sync_cursor(&self, uuid: &str, cursor: Option<String>) -> Result<()> {
        let uuid = uuid.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE devices SET sync_cursor = ?1 WHERE uuid = ?2",
                params![cursor, uuid],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_sync_cursor(&self, uuid: &str) -> Result<Option<String>> {
        Ok(self.get_device(uuid).await?.and_then(|d| d.sync_cursor))
    }
}
