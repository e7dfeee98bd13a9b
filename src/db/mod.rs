mod connection;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{MetricSnapshot, ScreenshotRecord, SessionRecord};

/// Sink for tracking data. Writes are fire-and-forget so the tracking path
/// never blocks on storage; implementations report their own failures.
pub trait Persistence: Send + Sync {
    fn save_session(&self, session: SessionRecord);
    fn save_metric_snapshot(&self, snapshot: MetricSnapshot);
    fn save_screenshot(&self, screenshot: ScreenshotRecord);
}

impl Persistence for Database {
    fn save_session(&self, session: SessionRecord) {
        self.submit("save session", move |conn| {
            repositories::sessions::upsert(conn, &session)
        });
    }

    fn save_metric_snapshot(&self, snapshot: MetricSnapshot) {
        self.submit("save metric snapshot", move |conn| {
            repositories::snapshots::insert(conn, &snapshot)
        });
    }

    fn save_screenshot(&self, screenshot: ScreenshotRecord) {
        self.submit("save screenshot", move |conn| {
            repositories::screenshots::insert(conn, &screenshot)
        });
    }
}
