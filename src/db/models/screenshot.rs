use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub session_id: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}
