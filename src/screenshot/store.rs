use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use image::RgbaImage;

use crate::error::TrackerError;
use crate::platform::CapturedImage;

const DAY_FORMAT: &str = "%Y-%m-%d";
const FRAME_FORMAT: &str = "%H-%M-%S-%3f";
const FRAME_EXTENSION: &str = "png";

/// Screenshots on disk as `<root>/YYYY-MM-DD/HH-MM-SS-mmm.png` in local time, so
/// lexicographic order within a day is capture order.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    root: Arc<PathBuf>,
}

impl ScreenshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format(DAY_FORMAT).to_string())
    }

    pub fn path_for(&self, captured_at: DateTime<Local>) -> PathBuf {
        self.day_dir(captured_at.date_naive()).join(format!(
            "{}.{FRAME_EXTENSION}",
            captured_at.format(FRAME_FORMAT)
        ))
    }

    /// Encode `image` as PNG under its capture time. Two captures in the same
    /// millisecond get a numeric suffix that still sorts after the first.
    pub fn save(
        &self,
        image: &CapturedImage,
        captured_at: DateTime<Local>,
    ) -> Result<PathBuf, TrackerError> {
        let buffer = RgbaImage::from_raw(image.width, image.height, image.rgba.clone())
            .ok_or_else(|| {
                TrackerError::TransientIo(format!(
                    "captured buffer does not match {}x{}",
                    image.width, image.height
                ))
            })?;

        let path = self.unused_path(captured_at);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        buffer.save(&path)?;
        Ok(path)
    }

    fn unused_path(&self, captured_at: DateTime<Local>) -> PathBuf {
        let path = self.path_for(captured_at);
        if !path.exists() {
            return path;
        }
        let stem = captured_at.format(FRAME_FORMAT).to_string();
        let dir = self.day_dir(captured_at.date_naive());
        (1u32..)
            .map(|n| dir.join(format!("{stem}_{n:02}.{FRAME_EXTENSION}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(path)
    }

    /// Days that have at least one frame, oldest first.
    pub fn capture_dates(&self) -> io::Result<Vec<NaiveDate>> {
        let entries = match fs::read_dir(self.root.as_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut dates = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Ok(date) = NaiveDate::parse_from_str(&name.to_string_lossy(), DAY_FORMAT) else {
                continue;
            };
            if self.frame_count(date)? > 0 {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub fn frame_count(&self, date: NaiveDate) -> io::Result<usize> {
        Ok(self.frames_for_date(date)?.len())
    }

    /// Frame paths for one day in capture order.
    pub fn frames_for_date(&self, date: NaiveDate) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.day_dir(date)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut frames: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| frame_time(path).is_some())
            .collect();
        frames.sort();
        Ok(frames)
    }

    /// Frames captured in `[since, until)`, in capture order.
    pub fn frames_between(
        &self,
        since: DateTime<Local>,
        until: DateTime<Local>,
    ) -> io::Result<Vec<PathBuf>> {
        let since = since.naive_local();
        let until = until.naive_local();
        let mut frames = Vec::new();
        let mut day = since.date();
        while day <= until.date() {
            for path in self.frames_for_date(day)? {
                let Some(time) = frame_time(&path) else {
                    continue;
                };
                let at = NaiveDateTime::new(day, time);
                if at >= since && at < until {
                    frames.push(path);
                }
            }
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
        Ok(frames)
    }
}

fn frame_time(path: &Path) -> Option<NaiveTime> {
    if path.extension()? != FRAME_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let base = stem.split_once('_').map_or(stem, |(base, _)| base);
    NaiveTime::parse_from_str(base, FRAME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tiny_image;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 12, h, m, s).unwrap()
    }

    #[test]
    fn names_sort_chronologically() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());

        let first = store.save(&tiny_image(), at(9, 59, 59)).unwrap();
        let second = store.save(&tiny_image(), at(10, 0, 0)).unwrap();

        assert!(first < second);
        assert_eq!(
            first,
            dir.path().join("2024-06-12").join("09-59-59-000.png")
        );
    }

    #[test]
    fn same_millisecond_gets_a_suffix() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let when = at(12, 0, 0);

        let a = store.save(&tiny_image(), when).unwrap();
        let b = store.save(&tiny_image(), when).unwrap();
        let c = store.save(&tiny_image(), when + Duration::milliseconds(1)).unwrap();

        assert_ne!(a, b);
        let frames = store.frames_for_date(when.date_naive()).unwrap();
        assert_eq!(frames, vec![a, b, c]);
    }

    #[test]
    fn lists_dates_and_windows() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let morning = at(8, 0, 0);
        let next_day = morning + Duration::days(1);
        store.save(&tiny_image(), morning).unwrap();
        store.save(&tiny_image(), morning + Duration::minutes(30)).unwrap();
        store.save(&tiny_image(), next_day).unwrap();
        fs::create_dir_all(dir.path().join("not-a-date")).unwrap();
        fs::create_dir_all(store.day_dir(morning.date_naive() + Duration::days(5))).unwrap();

        assert_eq!(
            store.capture_dates().unwrap(),
            vec![morning.date_naive(), next_day.date_naive()]
        );
        assert_eq!(store.frame_count(morning.date_naive()).unwrap(), 2);
        let window = store
            .frames_between(morning + Duration::minutes(1), next_day + Duration::seconds(1))
            .unwrap();
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn empty_store_has_no_dates() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path().join("missing"));
        assert!(store.capture_dates().unwrap().is_empty());
    }

    #[test]
    fn mismatched_buffer_is_a_transient_failure() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let bad = CapturedImage {
            width: 10,
            height: 10,
            rgba: vec![0; 4],
        };
        assert!(matches!(
            store.save(&bad, at(1, 0, 0)),
            Err(TrackerError::TransientIo(_))
        ));
    }
}
