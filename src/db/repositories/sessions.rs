use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{count_column, optional_timestamp_column, stored_count, timestamp_column};
use crate::db::{connection::Database, models::SessionRecord};

const SESSION_COLUMNS: &str = "id, started_at, ended_at, mouse_clicks, keystrokes, \
     context_shifts, git_commits, screenshot_count, active_minutes";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get("id")?,
        started_at: timestamp_column(row, "started_at")?,
        ended_at: optional_timestamp_column(row, "ended_at")?,
        mouse_clicks: count_column(row, "mouse_clicks")?,
        keystrokes: count_column(row, "keystrokes")?,
        context_shifts: count_column(row, "context_shifts")?,
        git_commits: count_column(row, "git_commits")?,
        screenshot_count: count_column(row, "screenshot_count")?,
        active_minutes: count_column(row, "active_minutes")?,
    })
}

pub(crate) fn upsert(conn: &mut Connection, session: &SessionRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, started_at, ended_at, mouse_clicks, keystrokes, context_shifts,
                               git_commits, screenshot_count, active_minutes, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             ended_at = excluded.ended_at,
             mouse_clicks = excluded.mouse_clicks,
             keystrokes = excluded.keystrokes,
             context_shifts = excluded.context_shifts,
             git_commits = excluded.git_commits,
             screenshot_count = excluded.screenshot_count,
             active_minutes = excluded.active_minutes,
             updated_at = excluded.updated_at",
        params![
            session.id,
            session.started_at.to_rfc3339(),
            session.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
            stored_count(session.mouse_clicks, "mouse_clicks")?,
            stored_count(session.keystrokes, "keystrokes")?,
            stored_count(session.context_shifts, "context_shifts")?,
            stored_count(session.git_commits, "git_commits")?,
            stored_count(session.screenshot_count, "screenshot_count")?,
            stored_count(session.active_minutes, "active_minutes")?,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("failed to upsert session {}", session.id))?;
    Ok(())
}

impl Database {
    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let id = id.to_owned();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let row = stmt
                .query_row(params![id], |row| Ok(row_to_session(row)))
                .optional()?;
            row.transpose()
        })
        .await
    }

    /// Most recent sessions first.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let limit = stored_count(limit as u64, "limit")?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Sessions left open by a crash are closed at their last persisted update.
    /// Returns how many were closed.
    pub async fn close_dangling_sessions(&self, fallback: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let closed = conn
                .execute(
                    "UPDATE sessions
                     SET ended_at = COALESCE(updated_at, ?1), updated_at = ?1
                     WHERE ended_at IS NULL",
                    params![fallback.to_rfc3339()],
                )
                .context("failed to close dangling sessions")?;
            Ok(closed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Persistence;
    use tempfile::TempDir;

    fn record(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            mouse_clicks: 0,
            keystrokes: 0,
            context_shifts: 0,
            git_commits: 0,
            screenshot_count: 0,
            active_minutes: 0,
        }
    }

    #[tokio::test]
    async fn save_session_upserts_counters() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("devlapse.db")).unwrap();

        let mut session = record("s-1");
        db.save_session(session.clone());
        session.mouse_clicks = 3;
        session.keystrokes = 5;
        session.ended_at = Some(Utc::now());
        db.save_session(session.clone());

        let stored = db.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(stored.mouse_clicks, 3);
        assert_eq!(stored.keystrokes, 5);
        assert!(!stored.is_open());
        assert_eq!(db.list_sessions(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closes_sessions_left_open() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("devlapse.db")).unwrap();

        db.save_session(record("open"));
        let mut closed = record("closed");
        closed.ended_at = Some(Utc::now());
        db.save_session(closed);

        assert_eq!(db.close_dangling_sessions(Utc::now()).await.unwrap(), 1);
        let sessions = db.list_sessions(10).await.unwrap();
        assert!(sessions.iter().all(|s| !s.is_open()));
    }
}
