use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{ComponentState, TrackerEvent};
use super::state::{Effect, TrackingSnapshot, TrackingState, TrackingStatus};
use crate::activity::ACTIVITY_CHECK_INTERVAL;
use crate::db::{Persistence, SessionRecord};
use crate::error::TrackerError;
use crate::git::{GitRunner, GitService, GitServiceConfig};
use crate::permissions::{PermissionSnapshot, PermissionState};
use crate::platform::{Capability, Platform};
use crate::screenshot::{capture_once, ScreenshotScheduler, ScreenshotStore};
use crate::settings::{self, UserSettings};
use crate::watchers::{ContextWatcher, KeyWatcher, MouseWatcher};

const SNAPSHOT_PERIOD: Duration = Duration::from_secs(60);
const DEBUG_SNAPSHOT_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub screenshot_interval: Duration,
    pub inactivity_threshold: Duration,
    pub git: GitServiceConfig,
    pub tick_interval: Duration,
    pub snapshot_period: Duration,
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &UserSettings, debug_mode: bool) -> Self {
        Self {
            screenshot_interval: settings.screenshot_interval(),
            inactivity_threshold: settings.inactivity_threshold(),
            git: GitServiceConfig {
                roots: settings.git.resolved_roots(),
                poll_interval: settings.git.poll_interval(),
            },
            tick_interval: Duration::from_secs(1),
            snapshot_period: if debug_mode {
                DEBUG_SNAPSHOT_PERIOD
            } else {
                SNAPSHOT_PERIOD
            },
        }
    }
}

/// `DEVLAPSE_DEBUG=1` (or `true`) shortens the persistence cadence.
pub fn debug_mode_from_env() -> bool {
    std::env::var("DEVLAPSE_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

struct Components {
    mouse: MouseWatcher,
    keys: KeyWatcher,
    context: ContextWatcher,
    screenshots: ScreenshotScheduler,
    git: GitService,
    ticker: Option<Ticker>,
}

impl Components {
    fn start_input(&mut self, permissions: &PermissionSnapshot, state: &mut TrackingState) {
        state.components.mouse = self.mouse.start(permissions);
        state.components.keyboard = self.keys.start(permissions);
        state.components.context = self.context.start();
    }

    /// Reverse of `start_input`.
    fn stop_input(&mut self, state: &mut TrackingState) {
        self.context.stop();
        self.keys.stop();
        self.mouse.stop();
        state.components.context = ComponentState::Stopped;
        state.components.keyboard = ComponentState::Stopped;
        state.components.mouse = ComponentState::Stopped;
    }
}

/// Owns the tracking lifecycle. Cheap to clone; all clones drive the same
/// session.
///
/// Watchers and background services only send [`TrackerEvent`]s. A single
/// fold task applies them to [`TrackingState`], so counters have one writer.
/// Lifecycle methods take the component lock before the state lock.
#[derive(Clone)]
pub struct TrackingCoordinator {
    state: Arc<Mutex<TrackingState>>,
    components: Arc<Mutex<Components>>,
    events: mpsc::UnboundedSender<TrackerEvent>,
    permissions: PermissionState,
    platform: Arc<dyn Platform>,
    persistence: Arc<dyn Persistence>,
    store: ScreenshotStore,
    snapshots: Arc<watch::Sender<TrackingSnapshot>>,
    tick_interval: Duration,
    snapshot_period: Duration,
}

impl TrackingCoordinator {
    /// Must be called inside a tokio runtime; the fold task is spawned here.
    pub fn new(
        config: CoordinatorConfig,
        platform: Arc<dyn Platform>,
        git: Arc<dyn GitRunner>,
        persistence: Arc<dyn Persistence>,
        store: ScreenshotStore,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(TrackingState::new(
            config.inactivity_threshold,
            Instant::now(),
        )));
        let components = Components {
            mouse: MouseWatcher::new(platform.clone(), events.clone()),
            keys: KeyWatcher::new(platform.clone(), events.clone()),
            context: ContextWatcher::new(platform.clone(), events.clone()),
            screenshots: ScreenshotScheduler::new(
                platform.clone(),
                store.clone(),
                config.screenshot_interval,
            ),
            git: GitService::new(git, config.git.clone()),
            ticker: None,
        };
        let (snapshots, _) = watch::channel(TrackingSnapshot::default());

        let coordinator = Self {
            state,
            components: Arc::new(Mutex::new(components)),
            events,
            permissions: PermissionState::new(platform.clone()),
            platform,
            persistence,
            store,
            snapshots: Arc::new(snapshots),
            tick_interval: config.tick_interval,
            snapshot_period: config.snapshot_period,
        };
        tokio::spawn(fold_events(
            rx,
            coordinator.state.clone(),
            coordinator.persistence.clone(),
            coordinator.snapshots.clone(),
            coordinator.permissions.clone(),
        ));
        coordinator
    }

    /// Stopped -> Running. Permissions are checked first, then input watchers,
    /// then the timers, git service and screenshot scheduler. A no-op unless
    /// stopped.
    pub async fn start(&self) -> Result<TrackingSnapshot> {
        let mut components = self.components.lock().await;
        let permissions = self.permissions.check_all();
        let mut state = self.state.lock().await;
        if state.status() != TrackingStatus::Stopped {
            return Ok(self.publish(&state));
        }

        let now = Instant::now();
        let run = state.begin(Uuid::new_v4().to_string(), Utc::now(), now);
        if let Some(record) = state.session_record(now) {
            info!("Session {} started", record.id);
            self.persistence.save_session(record);
        }

        components.start_input(&permissions, &mut state);
        components.ticker = Some(self.spawn_ticker());
        state.components.git = components.git.start(run, self.events.clone());
        state.components.screenshots = components.screenshots.start(
            run,
            &permissions,
            state.activity(),
            self.events.clone(),
        );

        Ok(self.publish(&state))
    }

    /// Running/Paused -> Stopped. Every timer and interception channel is gone
    /// when this returns. Returns the closed session, or `None` if already stopped.
    pub async fn stop(&self) -> Result<Option<SessionRecord>> {
        let mut components = self.components.lock().await;
        if self.state.lock().await.status() == TrackingStatus::Stopped {
            return Ok(None);
        }

        components.screenshots.stop();
        components.git.stop();
        if let Some(ticker) = components.ticker.take() {
            ticker.stop();
        }
        {
            let mut state = self.state.lock().await;
            components.stop_input(&mut state);
        }

        // Inputs delivered before the taps went away still belong to the session.
        self.flush().await?;

        let mut state = self.state.lock().await;
        let record = state.end(Utc::now(), Instant::now());
        state.components.screenshots = ComponentState::Stopped;
        state.components.git = ComponentState::Stopped;
        if let Some(record) = &record {
            info!(
                "Session {} ended: {} clicks, {} keystrokes, {} context shifts, {} commits, {} screenshots",
                record.id,
                record.mouse_clicks,
                record.keystrokes,
                record.context_shifts,
                record.git_commits,
                record.screenshot_count
            );
            self.persistence.save_session(record.clone());
        }
        self.publish(&state);
        Ok(record)
    }

    /// Stops input, context and screenshots. The session clock, git polling and
    /// the time-since-last-commit clock keep running.
    pub async fn pause(&self) -> Result<TrackingSnapshot> {
        let mut components = self.components.lock().await;
        {
            let mut state = self.state.lock().await;
            if state.status() != TrackingStatus::Running {
                return Ok(self.publish(&state));
            }
            components.screenshots.stop();
            state.components.screenshots = ComponentState::Stopped;
            components.stop_input(&mut state);
        }
        components.git.cancel_backfill();

        self.flush().await?;

        let mut state = self.state.lock().await;
        state.pause(Instant::now());
        Ok(self.publish(&state))
    }

    pub async fn resume(&self) -> Result<TrackingSnapshot> {
        let mut components = self.components.lock().await;
        let permissions = self.permissions.check_all();
        let mut state = self.state.lock().await;
        if !state.resume(Instant::now()) {
            return Ok(self.publish(&state));
        }

        let run = state.run();
        components.start_input(&permissions, &mut state);
        state.components.screenshots = components.screenshots.start(
            run,
            &permissions,
            state.activity(),
            self.events.clone(),
        );
        components.git.resume_backfill();

        Ok(self.publish(&state))
    }

    /// Pause when running, resume when paused, start when stopped.
    pub async fn toggle_pause(&self) -> Result<TrackingStatus> {
        let status = self.state.lock().await.status();
        let snapshot = match status {
            TrackingStatus::Running => self.pause().await?,
            TrackingStatus::Paused => self.resume().await?,
            TrackingStatus::Stopped => self.start().await?,
        };
        Ok(snapshot.status)
    }

    /// Close the current session and begin a zeroed one. Returns the closed
    /// session, or `None` when nothing is being tracked.
    pub async fn reset_session_counters(&self) -> Result<Option<SessionRecord>> {
        let _components = self.components.lock().await;
        if self.state.lock().await.status() == TrackingStatus::Stopped {
            return Ok(None);
        }
        self.flush().await?;

        let mut state = self.state.lock().await;
        let now = Instant::now();
        let closed = state.reset(Uuid::new_v4().to_string(), Utc::now(), now);

        if let Some(closed) = &closed {
            info!("Session {} closed by reset", closed.id);
            self.persistence.save_session(closed.clone());
        }
        if let Some(fresh) = state.session_record(now) {
            self.persistence.save_session(fresh);
        }
        self.publish(&state);
        Ok(closed)
    }

    /// Capture immediately regardless of activity. Counted toward the session
    /// when one is open.
    pub async fn take_screenshot_now(&self) -> Result<PathBuf> {
        let permissions = self.permissions.check_all();
        if !permissions.is_granted(Capability::ScreenRecording) {
            return Err(TrackerError::PermissionDenied(Capability::ScreenRecording).into());
        }

        let run = self.state.lock().await.run();
        let platform = self.platform.clone();
        let store = self.store.clone();
        let record = tokio::task::spawn_blocking(move || capture_once(platform.as_ref(), &store))
            .await
            .context("screenshot task failed")??;

        let path = record.path.clone();
        info!("Saved screenshot {}", path.display());
        self.send(TrackerEvent::ScreenshotSaved { run, record });
        Ok(path)
    }

    pub async fn update_screenshot_interval(&self, secs: u64) -> Result<()> {
        let interval = settings::screenshot_interval(secs)?;
        self.components
            .lock()
            .await
            .screenshots
            .update_interval(interval);
        Ok(())
    }

    pub async fn set_inactivity_threshold(&self, threshold: Duration) {
        self.state.lock().await.set_inactivity_threshold(threshold);
    }

    /// Git settings apply from the next `start()`.
    pub async fn set_git_config(&self, config: GitServiceConfig) {
        self.components.lock().await.git.set_config(config);
    }

    /// Mark the user active from outside the input taps (camera motion).
    pub fn record_external_activity(&self) {
        self.send(TrackerEvent::ExternalActivity);
    }

    pub async fn recheck_permissions(&self) -> PermissionSnapshot {
        let permissions = self.permissions.check_all();
        self.publish(&*self.state.lock().await);
        permissions
    }

    /// The new grant takes effect on the next start or resume.
    pub async fn request_permission(&self, capability: Capability) -> PermissionSnapshot {
        let permissions = self.permissions.request(capability).await;
        self.publish(&*self.state.lock().await);
        permissions
    }

    pub fn open_screenshots_folder(&self) -> Result<()> {
        let root = self.store.root();
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create {}", root.display()))?;
        self.platform.open_folder(root)?;
        Ok(())
    }

    pub async fn status(&self) -> TrackingStatus {
        self.state.lock().await.status()
    }

    pub async fn snapshot(&self) -> TrackingSnapshot {
        let state = self.state.lock().await;
        state.snapshot(Instant::now(), Utc::now(), self.permissions.latest())
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn screenshots(&self) -> &ScreenshotStore {
        &self.store
    }

    /// Resolves once every event sent before this call has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(TrackerEvent::Barrier(tx))
            .map_err(|_| anyhow!("event loop is not running"))?;
        rx.await.context("event loop dropped the flush barrier")
    }

    fn send(&self, event: TrackerEvent) {
        if self.events.send(event).is_err() {
            error!("Tracking event loop is gone; event dropped");
        }
    }

    fn publish(&self, state: &TrackingState) -> TrackingSnapshot {
        let snapshot = state.snapshot(Instant::now(), Utc::now(), self.permissions.latest());
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }

    fn spawn_ticker(&self) -> Ticker {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(
            self.events.clone(),
            cancel.clone(),
            self.tick_interval,
            self.snapshot_period,
        ));
        Ticker { cancel, handle }
    }
}

async fn run_ticker(
    events: mpsc::UnboundedSender<TrackerEvent>,
    cancel: CancellationToken,
    tick_interval: Duration,
    snapshot_period: Duration,
) {
    let start = Instant::now();
    let mut tick = interval_at(start + tick_interval, tick_interval);
    let mut activity = interval_at(start + ACTIVITY_CHECK_INTERVAL, ACTIVITY_CHECK_INTERVAL);
    let mut persist = interval_at(start + snapshot_period, snapshot_period);
    for timer in [&mut tick, &mut activity, &mut persist] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => TrackerEvent::Tick,
            _ = activity.tick() => TrackerEvent::ActivityCheck,
            _ = persist.tick() => TrackerEvent::PersistSnapshot,
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

/// The single writer of tracking state.
async fn fold_events(
    mut rx: mpsc::UnboundedReceiver<TrackerEvent>,
    state: Arc<Mutex<TrackingState>>,
    persistence: Arc<dyn Persistence>,
    snapshots: Arc<watch::Sender<TrackingSnapshot>>,
    permissions: PermissionState,
) {
    while let Some(event) = rx.recv().await {
        if let TrackerEvent::Barrier(ack) = event {
            let _ = ack.send(());
            continue;
        }

        let effect = {
            let mut state = state.lock().await;
            let now = Instant::now();
            let effect = state.apply(event, now);
            snapshots.send_replace(state.snapshot(now, Utc::now(), permissions.latest()));
            effect
        };

        match effect {
            Effect::None => {}
            Effect::SaveScreenshot(record) => persistence.save_screenshot(record),
            Effect::SaveProgress { session, snapshot } => {
                persistence.save_session(session);
                persistence.save_metric_snapshot(snapshot);
            }
        }
    }
    debug!("Tracking event loop stopped");
}
