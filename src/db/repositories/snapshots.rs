use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::{count_column, stored_count, timestamp_column};
use crate::db::{connection::Database, models::MetricSnapshot};

pub(crate) fn insert(conn: &mut Connection, snapshot: &MetricSnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO metric_snapshots (session_id, recorded_at, mouse_clicks, keystrokes,
                                       context_shifts, git_commits, screenshot_count,
                                       active_minutes, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            snapshot.session_id,
            snapshot.recorded_at.to_rfc3339(),
            stored_count(snapshot.mouse_clicks, "mouse_clicks")?,
            stored_count(snapshot.keystrokes, "keystrokes")?,
            stored_count(snapshot.context_shifts, "context_shifts")?,
            stored_count(snapshot.git_commits, "git_commits")?,
            stored_count(snapshot.screenshot_count, "screenshot_count")?,
            stored_count(snapshot.active_minutes, "active_minutes")?,
            snapshot.is_active,
        ],
    )
    .context("failed to insert metric snapshot")?;
    Ok(())
}

impl Database {
    pub async fn snapshots_for_session(&self, session_id: &str) -> Result<Vec<MetricSnapshot>> {
        let session_id = session_id.to_owned();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, recorded_at, mouse_clicks, keystrokes, context_shifts,
                        git_commits, screenshot_count, active_minutes, is_active
                 FROM metric_snapshots WHERE session_id = ?1 ORDER BY recorded_at ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(MetricSnapshot {
                    session_id: row.get("session_id")?,
                    recorded_at: timestamp_column(row, "recorded_at")?,
                    mouse_clicks: count_column(row, "mouse_clicks")?,
                    keystrokes: count_column(row, "keystrokes")?,
                    context_shifts: count_column(row, "context_shifts")?,
                    git_commits: count_column(row, "git_commits")?,
                    screenshot_count: count_column(row, "screenshot_count")?,
                    active_minutes: count_column(row, "active_minutes")?,
                    is_active: row.get("is_active")?,
                });
            }
            Ok(snapshots)
        })
        .await
    }
}
