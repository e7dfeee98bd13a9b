use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::store::ScreenshotStore;
use crate::coordinator::events::{ComponentState, RunId, TrackerEvent};
use crate::db::ScreenshotRecord;
use crate::error::TrackerError;
use crate::permissions::PermissionSnapshot;
use crate::platform::{Capability, CaptureMethod, Platform};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Capture the desktop and write it to `store`. Blocking.
///
/// The all-windows composite is tried first; if it fails the main display is
/// captured instead.
pub fn capture_once(
    platform: &dyn Platform,
    store: &ScreenshotStore,
) -> Result<ScreenshotRecord, TrackerError> {
    let captured_at = Local::now();
    let image = match platform.capture_screen(CaptureMethod::AllWindows) {
        Ok(image) => image,
        Err(err) => {
            log_debug!("composite capture failed ({err}); falling back to main display");
            platform.capture_screen(CaptureMethod::MainDisplay)?
        }
    };

    let path = store.save(&image, captured_at)?;
    Ok(ScreenshotRecord {
        session_id: None,
        captured_at: captured_at.with_timezone(&Utc),
        path,
        width: image.width,
        height: image.height,
    })
}

/// Everything one capture tick needs, shared with the blocking pool.
#[derive(Clone)]
struct CaptureContext {
    run: RunId,
    platform: Arc<dyn Platform>,
    store: ScreenshotStore,
    events: UnboundedSender<TrackerEvent>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickResult {
    SkippedInactive,
    Saved,
    Failed,
    Cancelled,
}

impl CaptureContext {
    /// The activity gate is read once, here; an inactive tick does nothing.
    async fn tick(&self, active: bool) -> TickResult {
        if !active {
            log_debug!("user inactive; skipping screenshot");
            return TickResult::SkippedInactive;
        }

        let platform = self.platform.clone();
        let store = self.store.clone();
        let captured =
            tokio::task::spawn_blocking(move || capture_once(platform.as_ref(), &store)).await;

        if self.cancel.is_cancelled() {
            return TickResult::Cancelled;
        }
        match captured {
            Ok(Ok(record)) => {
                log_debug!("saved screenshot {}", record.path.display());
                let _ = self.events.send(TrackerEvent::ScreenshotSaved {
                    run: self.run,
                    record,
                });
                TickResult::Saved
            }
            Ok(Err(err)) => {
                log_warn!("screenshot skipped this cycle: {err}");
                TickResult::Failed
            }
            Err(err) => {
                log_warn!("screenshot task failed: {err}");
                TickResult::Failed
            }
        }
    }
}

/// Timer for `period` whose first deadline is one period after `last_fire`.
/// Switching periods this way neither fires twice nor skips a cycle.
fn rescheduled(last_fire: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(last_fire + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn capture_loop(
    ctx: CaptureContext,
    mut period: watch::Receiver<Duration>,
    activity: watch::Receiver<bool>,
) {
    let mut last_fire = Instant::now();
    let mut timer = rescheduled(last_fire, *period.borrow_and_update());

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                log_info!("screenshot loop shutting down");
                break;
            }
            changed = period.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *period.borrow_and_update();
                timer = rescheduled(last_fire, next);
                log_info!("screenshot interval set to {}s", next.as_secs());
            }
            fired = timer.tick() => {
                last_fire = fired;
                let active = *activity.borrow();
                if ctx.tick(active).await == TickResult::Cancelled {
                    break;
                }
            }
        }
    }
}

/// Periodic, activity-gated desktop capture.
pub struct ScreenshotScheduler {
    platform: Arc<dyn Platform>,
    store: ScreenshotStore,
    interval: Duration,
    period_tx: Option<watch::Sender<Duration>>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl ScreenshotScheduler {
    pub fn new(platform: Arc<dyn Platform>, store: ScreenshotStore, interval: Duration) -> Self {
        Self {
            platform,
            store,
            interval,
            period_tx: None,
            cancel: None,
            handle: None,
        }
    }

    /// Starts only with Screen Recording granted. The first capture happens one
    /// interval after start.
    pub fn start(
        &mut self,
        run: RunId,
        permissions: &PermissionSnapshot,
        activity: watch::Receiver<bool>,
        events: UnboundedSender<TrackerEvent>,
    ) -> ComponentState {
        if self.handle.is_some() {
            return ComponentState::Running;
        }
        if !permissions.is_granted(Capability::ScreenRecording) {
            return ComponentState::disabled(
                "screenshot scheduler",
                &TrackerError::PermissionDenied(Capability::ScreenRecording),
            );
        }

        let cancel = CancellationToken::new();
        let (period_tx, period_rx) = watch::channel(self.interval);
        let ctx = CaptureContext {
            run,
            platform: self.platform.clone(),
            store: self.store.clone(),
            events,
            cancel: cancel.clone(),
        };

        self.handle = Some(tokio::spawn(capture_loop(ctx, period_rx, activity)));
        self.cancel = Some(cancel);
        self.period_tx = Some(period_tx);
        log_info!(
            "screenshot scheduler started every {}s into {}",
            self.interval.as_secs(),
            self.store.root().display()
        );
        ComponentState::Running
    }

    /// Timer is gone on return; an in-flight capture may finish but is not reported.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.period_tx = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Swap the period of the running timer in place.
    pub fn update_interval(&mut self, interval: Duration) {
        self.interval = interval;
        if let Some(tx) = &self.period_tx {
            tx.send_replace(interval);
        }
    }

    pub fn store(&self) -> &ScreenshotStore {
        &self.store
    }
}

impl Drop for ScreenshotScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakePlatform;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn context(
        platform: Arc<FakePlatform>,
        store: ScreenshotStore,
    ) -> (CaptureContext, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let ctx = CaptureContext {
            run: 1,
            platform,
            store,
            events,
            cancel: CancellationToken::new(),
        };
        (ctx, rx)
    }

    fn frame_total(store: &ScreenshotStore) -> usize {
        store
            .capture_dates()
            .unwrap()
            .into_iter()
            .map(|date| store.frame_count(date).unwrap())
            .sum()
    }

    #[tokio::test]
    async fn inactive_tick_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let platform = Arc::new(FakePlatform::new());
        let (ctx, mut rx) = context(platform.clone(), store.clone());

        assert_eq!(ctx.tick(false).await, TickResult::SkippedInactive);
        assert_eq!(frame_total(&store), 0);
        assert!(platform.captures().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn active_tick_writes_exactly_one_file() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let platform = Arc::new(FakePlatform::new());
        let (ctx, mut rx) = context(platform.clone(), store.clone());

        assert_eq!(ctx.tick(true).await, TickResult::Saved);
        assert_eq!(frame_total(&store), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(TrackerEvent::ScreenshotSaved { run: 1, .. })
        ));
    }

    #[tokio::test]
    async fn falls_back_to_main_display() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let platform = Arc::new(FakePlatform::new());
        platform.fail_composite();

        let record = capture_once(platform.as_ref(), &store).unwrap();
        assert!(record.path.exists());
        assert_eq!(
            platform.captures(),
            vec![CaptureMethod::AllWindows, CaptureMethod::MainDisplay]
        );
    }

    #[tokio::test]
    async fn cancelled_capture_is_not_reported() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let platform = Arc::new(FakePlatform::new());
        let (ctx, mut rx) = context(platform, store);
        ctx.cancel.cancel();

        assert_eq!(ctx.tick(true).await, TickResult::Cancelled);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refuses_to_start_without_screen_recording() {
        let dir = TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new());
        let mut scheduler = ScreenshotScheduler::new(
            platform,
            ScreenshotStore::new(dir.path()),
            Duration::from_secs(60),
        );
        let (events, _rx) = mpsc::unbounded_channel();
        let (_activity_tx, activity) = watch::channel(true);
        let permissions = PermissionSnapshot {
            screen_recording: false,
            ..PermissionSnapshot::default()
        };

        let state = scheduler.start(1, &permissions, activity, events);
        assert!(matches!(state, ComponentState::Disabled(_)));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_timer_keeps_running_without_capturing() {
        let dir = TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new());
        let store = ScreenshotStore::new(dir.path());
        let mut scheduler =
            ScreenshotScheduler::new(platform.clone(), store.clone(), Duration::from_secs(10));
        let (events, _rx) = mpsc::unbounded_channel();
        let (_activity_tx, activity) = watch::channel(false);
        let permissions = PermissionSnapshot {
            screen_recording: true,
            ..PermissionSnapshot::default()
        };

        scheduler.start(1, &permissions, activity, events);
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert!(scheduler.is_running());
        assert!(platform.captures().is_empty());
        assert_eq!(frame_total(&store), 0);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn live_interval_change_reschedules_the_running_timer() {
        let dir = TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new());
        let mut scheduler = ScreenshotScheduler::new(
            platform.clone(),
            ScreenshotStore::new(dir.path()),
            Duration::from_secs(60),
        );
        let (events, _rx) = mpsc::unbounded_channel();
        let (_activity_tx, activity) = watch::channel(true);
        let permissions = PermissionSnapshot {
            screen_recording: true,
            ..PermissionSnapshot::default()
        };
        scheduler.start(1, &permissions, activity, events);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(platform.captures().is_empty());

        // 20s since start is already past, so the new period fires once right away.
        scheduler.update_interval(Duration::from_secs(20));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(platform.captures().len(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(platform.captures().len(), 2);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(platform.captures().len(), 4);
        assert_eq!(scheduler.interval(), Duration::from_secs(20));
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_is_measured_from_the_last_fire() {
        let last_fire = Instant::now();
        tokio::time::advance(Duration::from_secs(30)).await;

        // Shrinking past the elapsed time fires once, immediately.
        let mut shorter = rescheduled(last_fire, Duration::from_secs(20));
        assert_eq!(shorter.tick().await, last_fire + Duration::from_secs(20));
        assert_eq!(Instant::now(), last_fire + Duration::from_secs(30));
        assert_eq!(shorter.tick().await, last_fire + Duration::from_secs(50));

        let mut longer = rescheduled(last_fire, Duration::from_secs(120));
        assert_eq!(longer.tick().await, last_fire + Duration::from_secs(120));
    }
}
