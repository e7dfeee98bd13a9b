pub(crate) mod screenshots;
pub(crate) mod sessions;
pub(crate) mod snapshots;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Tracking counters are unsigned; SQLite stores them as signed INTEGER.
pub(crate) fn stored_count(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{column} value {value} exceeds SQLite INTEGER range"))
}

/// Read a tracking counter. A negative value means the row was written by
/// something other than this app.
pub(crate) fn count_column(row: &Row, column: &str) -> Result<u64> {
    let raw: i64 = row.get(column)?;
    u64::try_from(raw).map_err(|_| anyhow!("{column} holds negative count {raw}"))
}

/// Screenshot dimensions.
pub(crate) fn pixel_column(row: &Row, column: &str) -> Result<u32> {
    let raw: i64 = row.get(column)?;
    u32::try_from(raw).map_err(|_| anyhow!("{column} holds invalid pixel size {raw}"))
}

pub(crate) fn timestamp_column(row: &Row, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw, column)
}

/// `None` for a session that is still open.
pub(crate) fn optional_timestamp_column(row: &Row, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| parse_timestamp(&raw, column)).transpose()
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {column} timestamp {raw:?}"))
}
