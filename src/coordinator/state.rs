use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use super::events::{ComponentState, InputKind, RunId, TrackerEvent};
use crate::activity::{ActivityGate, ActivityTransition};
use crate::db::{MetricSnapshot, ScreenshotRecord, SessionRecord};
use crate::git::RecentCommit;
use crate::permissions::PermissionSnapshot;
use crate::platform::AppIdentity;
use crate::watchers::ContextShiftDetector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingStatus {
    #[default]
    Stopped,
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    pub mouse_clicks: u64,
    pub keystrokes: u64,
    pub context_shifts: u64,
    pub git_commits: u64,
    pub screenshot_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatuses {
    pub mouse: ComponentState,
    pub keyboard: ComponentState,
    pub context: ComponentState,
    pub screenshots: ComponentState,
    pub git: ComponentState,
}

/// Accumulated active time: closed spans plus the span open since `anchor`.
#[derive(Debug, Clone, Copy, Default)]
struct ActiveClock {
    baseline: Duration,
    anchor: Option<Instant>,
}

impl ActiveClock {
    fn open(&mut self, at: Instant) {
        self.anchor.get_or_insert(at);
    }

    fn close(&mut self, at: Instant) {
        if let Some(anchor) = self.anchor.take() {
            self.baseline += at.saturating_duration_since(anchor);
        }
    }

    fn total(&self, now: Instant) -> Duration {
        self.baseline
            + self
                .anchor
                .map(|anchor| now.saturating_duration_since(anchor))
                .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct TrackingSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub counters: SessionCounters,
    clock_origin: Instant,
    active: ActiveClock,
}

impl TrackingSession {
    fn new(id: String, started_at: DateTime<Utc>, now: Instant) -> Self {
        Self {
            id,
            started_at,
            counters: SessionCounters::default(),
            clock_origin: now,
            active: ActiveClock::default(),
        }
    }

    /// Wall-clock length of the session. Pausing does not stop it.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.clock_origin)
    }

    pub fn active_time(&self, now: Instant) -> Duration {
        self.active.total(now)
    }

    fn record(&self, ended_at: Option<DateTime<Utc>>, now: Instant) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            started_at: self.started_at,
            ended_at,
            mouse_clicks: self.counters.mouse_clicks,
            keystrokes: self.counters.keystrokes,
            context_shifts: self.counters.context_shifts,
            git_commits: self.counters.git_commits,
            screenshot_count: self.counters.screenshot_count,
            active_minutes: self.active_time(now).as_secs() / 60,
        }
    }
}

/// Tracks whether the backfill in flight may still be applied.
#[derive(Debug, Clone, Copy, Default)]
struct BackfillTracker {
    in_flight: Option<u64>,
    superseded: bool,
}

/// Read-only view published to the display layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub status: TrackingStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub session_elapsed_secs: u64,
    pub counters: SessionCounters,
    pub active_minutes: u64,
    pub is_active: bool,
    pub current_app: Option<String>,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub secs_since_last_commit: Option<u64>,
    pub most_recent_project: Option<String>,
    pub permissions: PermissionSnapshot,
    pub components: ComponentStatuses,
}

/// Side effects the fold task performs after applying an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    SaveScreenshot(ScreenshotRecord),
    SaveProgress {
        session: SessionRecord,
        snapshot: MetricSnapshot,
    },
}

/// All mutable tracking state. Only the coordinator's fold task and its
/// lifecycle methods touch this, always under one lock.
#[derive(Debug)]
pub struct TrackingState {
    status: TrackingStatus,
    run: RunId,
    session: Option<TrackingSession>,
    gate: ActivityGate,
    detector: ContextShiftDetector,
    current_app: Option<String>,
    last_commit_at: Option<DateTime<Utc>>,
    most_recent_project: Option<String>,
    backfill: BackfillTracker,
    pub components: ComponentStatuses,
}

impl TrackingState {
    pub fn new(inactivity_threshold: Duration, now: Instant) -> Self {
        Self {
            status: TrackingStatus::Stopped,
            run: 0,
            session: None,
            gate: ActivityGate::new(inactivity_threshold, now),
            detector: ContextShiftDetector::new(),
            current_app: None,
            last_commit_at: None,
            most_recent_project: None,
            backfill: BackfillTracker::default(),
            components: ComponentStatuses::default(),
        }
    }

    pub fn status(&self) -> TrackingStatus {
        self.status
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    pub fn activity(&self) -> watch::Receiver<bool> {
        self.gate.subscribe()
    }

    pub fn set_inactivity_threshold(&mut self, threshold: Duration) {
        self.gate.set_threshold(threshold);
    }

    /// Stopped -> Running with a fresh session. Returns the new run id.
    pub fn begin(&mut self, id: String, started_at: DateTime<Utc>, now: Instant) -> RunId {
        self.run += 1;
        self.session = Some(TrackingSession::new(id, started_at, now));
        self.detector = ContextShiftDetector::new();
        self.backfill = BackfillTracker::default();
        self.set_status(TrackingStatus::Running);
        self.gate.record_activity(now);
        self.open_active_clock(now);
        self.run
    }

    pub fn pause(&mut self, now: Instant) -> bool {
        if self.status != TrackingStatus::Running {
            return false;
        }
        if let Some(session) = self.session.as_mut() {
            session.active.close(now);
        }
        self.set_status(TrackingStatus::Paused);
        true
    }

    /// Resuming counts as activity.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.status != TrackingStatus::Paused {
            return false;
        }
        self.set_status(TrackingStatus::Running);
        self.gate.record_activity(now);
        self.open_active_clock(now);
        true
    }

    /// Closes the session and returns its final record.
    pub fn end(&mut self, ended_at: DateTime<Utc>, now: Instant) -> Option<SessionRecord> {
        if self.status == TrackingStatus::Stopped {
            return None;
        }
        self.set_status(TrackingStatus::Stopped);
        self.backfill = BackfillTracker::default();
        let mut session = self.session.take()?;
        session.active.close(now);
        let ended_at = ended_at.max(session.started_at);
        Some(session.record(Some(ended_at), now))
    }

    /// Close the current session and open a zeroed one in the same status.
    /// A backfill still in flight is discarded.
    pub fn reset(
        &mut self,
        id: String,
        started_at: DateTime<Utc>,
        now: Instant,
    ) -> Option<SessionRecord> {
        let mut previous = self.session.take()?;
        previous.active.close(now);
        let closed = previous.record(Some(started_at.max(previous.started_at)), now);

        self.session = Some(TrackingSession::new(id, started_at, now));
        if self.backfill.in_flight.is_some() {
            self.backfill.superseded = true;
        }
        if self.status == TrackingStatus::Running {
            self.gate.record_activity(now);
            self.open_active_clock(now);
        }
        Some(closed)
    }

    pub fn apply(&mut self, event: TrackerEvent, now: Instant) -> Effect {
        match event {
            TrackerEvent::Input(kind) => {
                if let Some(session) = self.running_session() {
                    match kind {
                        InputKind::MouseClick => session.counters.mouse_clicks += 1,
                        InputKind::Keystroke => session.counters.keystrokes += 1,
                    }
                    self.touch(now);
                }
            }
            TrackerEvent::AppActivated(app) => {
                if self.status == TrackingStatus::Running {
                    self.current_app = Some(app.display_name().to_string());
                    if self.detector.observe(&app) {
                        if let Some(session) = self.session.as_mut() {
                            session.counters.context_shifts += 1;
                        }
                    }
                    self.touch(now);
                }
            }
            TrackerEvent::AppBaseline(app) => self.seed_app(app.as_ref()),
            TrackerEvent::ExternalActivity => {
                if self.status == TrackingStatus::Running {
                    self.touch(now);
                }
            }
            TrackerEvent::ActivityCheck => {
                if self.status == TrackingStatus::Running {
                    self.check_activity(now);
                }
            }
            TrackerEvent::PersistSnapshot => {
                if let Some(session) = &self.session {
                    return Effect::SaveProgress {
                        session: session.record(None, now),
                        snapshot: self.metric_snapshot(session, now),
                    };
                }
            }
            TrackerEvent::ScreenshotSaved { run, mut record } => {
                if run != self.run {
                    debug!("Dropping screenshot result from run {run}");
                    return Effect::None;
                }
                if let Some(session) = self.session.as_mut() {
                    session.counters.screenshot_count += 1;
                    record.session_id = Some(session.id.clone());
                }
                return Effect::SaveScreenshot(record);
            }
            TrackerEvent::GitPolled { run, outcome } => {
                if run != self.run {
                    return Effect::None;
                }
                let Some(session) = self.session.as_mut() else {
                    return Effect::None;
                };
                session.counters.git_commits += outcome.new_commits;
                if outcome.new_commits > 0 && self.backfill.in_flight.is_some() {
                    debug!("Incremental poll saw new commits; superseding in-flight backfill");
                    self.backfill.superseded = true;
                }
                if let Some(recent) = outcome.most_recent {
                    self.note_commit(&recent);
                }
            }
            TrackerEvent::BackfillStarted { run, generation } => {
                if run == self.run {
                    self.backfill = BackfillTracker {
                        in_flight: Some(generation),
                        superseded: false,
                    };
                }
            }
            TrackerEvent::BackfillFinished {
                run,
                generation,
                outcome,
            } => {
                if run != self.run || self.backfill.in_flight != Some(generation) {
                    debug!("Dropping stale backfill generation {generation}");
                    return Effect::None;
                }
                let superseded = self.backfill.superseded;
                self.backfill = BackfillTracker::default();
                if superseded {
                    debug!("Discarding superseded backfill ({} commits)", outcome.commits);
                    return Effect::None;
                }
                if let Some(session) = self.session.as_mut() {
                    session.counters.git_commits += outcome.commits;
                    if outcome.commits > 0 {
                        info!("Backfilled {} commits from earlier today", outcome.commits);
                    }
                }
                if let Some(latest) = outcome.latest {
                    self.note_commit(&latest);
                }
            }
            TrackerEvent::Tick | TrackerEvent::Barrier(_) => {}
        }
        Effect::None
    }

    pub fn snapshot(
        &self,
        now: Instant,
        wall: DateTime<Utc>,
        permissions: PermissionSnapshot,
    ) -> TrackingSnapshot {
        let session = self.session.as_ref();
        TrackingSnapshot {
            status: self.status,
            session_id: session.map(|s| s.id.clone()),
            started_at: session.map(|s| s.started_at),
            session_elapsed_secs: session.map_or(0, |s| s.elapsed(now).as_secs()),
            counters: session.map(|s| s.counters).unwrap_or_default(),
            active_minutes: session.map_or(0, |s| s.active_time(now).as_secs() / 60),
            is_active: self.gate.is_active(),
            current_app: self.current_app.clone(),
            last_commit_at: self.last_commit_at,
            secs_since_last_commit: self
                .last_commit_at
                .map(|at| (wall - at).num_seconds().max(0) as u64),
            most_recent_project: self.most_recent_project.clone(),
            permissions,
            components: self.components.clone(),
        }
    }

    pub fn session_record(&self, now: Instant) -> Option<SessionRecord> {
        self.session.as_ref().map(|s| s.record(None, now))
    }

    fn metric_snapshot(&self, session: &TrackingSession, now: Instant) -> MetricSnapshot {
        MetricSnapshot {
            session_id: session.id.clone(),
            recorded_at: Utc::now(),
            mouse_clicks: session.counters.mouse_clicks,
            keystrokes: session.counters.keystrokes,
            context_shifts: session.counters.context_shifts,
            git_commits: session.counters.git_commits,
            screenshot_count: session.counters.screenshot_count,
            active_minutes: session.active_time(now).as_secs() / 60,
            is_active: self.status == TrackingStatus::Running && self.gate.is_active(),
        }
    }

    fn running_session(&mut self) -> Option<&mut TrackingSession> {
        if self.status != TrackingStatus::Running {
            return None;
        }
        self.session.as_mut()
    }

    fn seed_app(&mut self, app: Option<&AppIdentity>) {
        self.detector.seed(app);
        if let Some(app) = app {
            self.current_app = Some(app.display_name().to_string());
        }
    }

    fn touch(&mut self, now: Instant) {
        if self.gate.record_activity(now) == Some(ActivityTransition::BecameActive) {
            self.open_active_clock(now);
        }
    }

    fn check_activity(&mut self, now: Instant) {
        match self.gate.evaluate(now) {
            Some(ActivityTransition::BecameInactive) => {
                let last_activity = self.gate.last_activity();
                if let Some(session) = self.session.as_mut() {
                    session.active.close(last_activity);
                }
            }
            Some(ActivityTransition::BecameActive) => self.open_active_clock(now),
            None => {}
        }
    }

    fn open_active_clock(&mut self, now: Instant) {
        if !self.gate.is_active() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.active.open(now);
        }
    }

    fn note_commit(&mut self, commit: &RecentCommit) {
        if self
            .last_commit_at
            .map_or(true, |last| commit.committed_at > last)
        {
            self.last_commit_at = Some(commit.committed_at);
            self.most_recent_project = Some(commit.project_name());
        }
    }

    fn set_status(&mut self, status: TrackingStatus) {
        if self.status != status {
            info!("Tracking {:?} -> {:?}", self.status, status);
            self.status = status;
        }
    }
}
