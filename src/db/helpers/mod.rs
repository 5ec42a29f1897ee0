use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::Direction;

pub fn format_datetime(value: DateTime<Utc>) -> String {
    // Millisecond precision; start times double as the sync join key.
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

/// A stored direction of 0 means "no session"; legacy rows used it as a
/// stopped marker.
pub fn parse_optional_direction(value: Option<i64>) -> Option<Direction> {
    match value {
        Some(0) | None => None,
        Some(raw) => Some(Direction::from_number(raw as f64)),
    }
}
