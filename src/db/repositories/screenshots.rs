use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{pixel_column, stored_count, timestamp_column};
use crate::db::{connection::Database, models::ScreenshotRecord};

pub(crate) fn insert(conn: &mut Connection, screenshot: &ScreenshotRecord) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO screenshots (session_id, captured_at, path, width, height)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            screenshot.session_id,
            screenshot.captured_at.to_rfc3339(),
            screenshot.path.to_string_lossy(),
            stored_count(u64::from(screenshot.width), "width")?,
            stored_count(u64::from(screenshot.height), "height")?,
        ],
    )
    .with_context(|| format!("failed to insert screenshot {}", screenshot.path.display()))?;
    Ok(())
}

impl Database {
    /// Screenshots captured in `[since, until)`, oldest first.
    pub async fn screenshots_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ScreenshotRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, captured_at, path, width, height FROM screenshots
                 WHERE captured_at >= ?1 AND captured_at < ?2
                 ORDER BY captured_at ASC",
            )?;
            let mut rows = stmt.query(params![since.to_rfc3339(), until.to_rfc3339()])?;
            let mut shots = Vec::new();
            while let Some(row) = rows.next()? {
                let path: String = row.get("path")?;
                shots.push(ScreenshotRecord {
                    session_id: row.get("session_id")?,
                    captured_at: timestamp_column(row, "captured_at")?,
                    path: PathBuf::from(path),
                    width: pixel_column(row, "width")?,
                    height: pixel_column(row, "height")?,
                });
            }
            Ok(shots)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Persistence, SessionRecord};
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn screenshots_are_queryable_by_range() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("devlapse.db")).unwrap();
        let now = Utc::now();

        db.save_session(SessionRecord {
            id: "s".into(),
            started_at: now,
            ended_at: None,
            mouse_clicks: 0,
            keystrokes: 0,
            context_shifts: 0,
            git_commits: 0,
            screenshot_count: 0,
            active_minutes: 0,
        });
        for (offset, name) in [(0, "a.png"), (30, "b.png"), (90, "c.png")] {
            db.save_screenshot(ScreenshotRecord {
                session_id: Some("s".into()),
                captured_at: now + Duration::seconds(offset),
                path: dir.path().join(name),
                width: 2,
                height: 2,
            });
        }

        let shots = db
            .screenshots_between(now, now + Duration::seconds(60))
            .await
            .unwrap();
        let names: Vec<_> = shots
            .iter()
            .filter_map(|s| s.path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }
}
