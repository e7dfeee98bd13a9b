//! Persisted shapes of tracking sessions and periodic metric snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracking session as handed to persistence. Saved when it opens, on every
/// snapshot period, and once more when it closes with `ended_at` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub mouse_clicks: u64,
    pub keystrokes: u64,
    pub context_shifts: u64,
    pub git_commits: u64,
    pub screenshot_count: u64,
    pub active_minutes: u64,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub session_id: String,
    pub recorded_at: DateTime<Utc>,
    pub mouse_clicks: u64,
    pub keystrokes: u64,
    pub context_shifts: u64,
    pub git_commits: u64,
    pub screenshot_count: u64,
    pub active_minutes: u64,
    pub is_active: bool,
}
