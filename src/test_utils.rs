//! Scriptable fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::db::{MetricSnapshot, Persistence, ScreenshotRecord, SessionRecord};
use crate::error::{GitError, TrackerError};
use crate::git::{CommitStamp, GitRunner};
use crate::platform::{
    ActivationSink, AppIdentity, Capability, CaptureMethod, CapturedImage, InputSink, InputTap,
    Platform, RawInputEvent, Subscription, TapKind,
};

pub fn app(bundle_id: &str, pid: i32) -> AppIdentity {
    AppIdentity {
        bundle_id: Some(bundle_id.to_string()),
        pid,
        name: None,
    }
}

/// A 2x2 opaque image.
pub fn tiny_image() -> CapturedImage {
    CapturedImage {
        width: 2,
        height: 2,
        rgba: [10, 20, 30, 255].repeat(4),
    }
}

struct InstalledTap {
    kind: TapKind,
    sink: Weak<dyn InputSink>,
    alive: Arc<AtomicBool>,
}

struct ObserverEntry {
    sink: Weak<dyn ActivationSink>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct FakePlatformState {
    denied: HashSet<Capability>,
    grant_on_request: HashSet<Capability>,
    requests: Vec<Capability>,
    taps: Vec<InstalledTap>,
    tap_installs: HashMap<TapKind, usize>,
    failing_taps: HashSet<TapKind>,
    observers: Vec<ObserverEntry>,
    frontmost: Option<AppIdentity>,
    composite_fails: bool,
    captures: Vec<CaptureMethod>,
    opened: Vec<PathBuf>,
}

/// In-memory platform. Every capability starts granted.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakePlatformState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakePlatformState> {
        self.state.lock().unwrap()
    }

    pub fn set_permission(&self, capability: Capability, granted: bool) {
        let mut state = self.lock();
        if granted {
            state.denied.remove(&capability);
        } else {
            state.denied.insert(capability);
        }
    }

    pub fn grant_on_request(&self, capability: Capability) {
        self.lock().grant_on_request.insert(capability);
    }

    pub fn requests(&self) -> Vec<Capability> {
        self.lock().requests.clone()
    }

    /// Deliver `event` to every live tap of `kind`, as the OS callback would.
    pub fn deliver(&self, kind: TapKind, event: RawInputEvent) {
        let sinks: Vec<Arc<dyn InputSink>> = self
            .lock()
            .taps
            .iter()
            .filter(|tap| tap.kind == kind && tap.alive.load(Ordering::Acquire))
            .filter_map(|tap| tap.sink.upgrade())
            .collect();
        for sink in sinks {
            sink.deliver(event);
        }
    }

    pub fn tap_installs(&self, kind: TapKind) -> usize {
        self.lock().tap_installs.get(&kind).copied().unwrap_or(0)
    }

    pub fn live_taps(&self, kind: TapKind) -> usize {
        self.lock()
            .taps
            .iter()
            .filter(|tap| tap.kind == kind && tap.alive.load(Ordering::Acquire))
            .count()
    }

    pub fn fail_tap(&self, kind: TapKind) {
        self.lock().failing_taps.insert(kind);
    }

    pub fn set_frontmost(&self, app: Option<AppIdentity>) {
        self.lock().frontmost = app;
    }

    /// Make `app` frontmost and notify live observers.
    pub fn activate(&self, app: AppIdentity) {
        self.lock().frontmost = Some(app.clone());
        self.notify_activation(app);
    }

    /// Notify live observers about `app` without touching the frontmost app,
    /// as when focus moves on again before the notification is handled.
    pub fn notify_activation(&self, app: AppIdentity) {
        let sinks: Vec<Arc<dyn ActivationSink>> = self
            .lock()
            .observers
            .iter()
            .filter(|entry| entry.alive.load(Ordering::Acquire))
            .filter_map(|entry| entry.sink.upgrade())
            .collect();
        for sink in sinks {
            sink.activated(app.clone());
        }
    }

    pub fn live_subscriptions(&self) -> usize {
        self.lock()
            .observers
            .iter()
            .filter(|entry| entry.alive.load(Ordering::Acquire))
            .count()
    }

    pub fn fail_composite(&self) {
        self.lock().composite_fails = true;
    }

    pub fn captures(&self) -> Vec<CaptureMethod> {
        self.lock().captures.clone()
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.lock().opened.clone()
    }
}

struct FakeTap {
    kind: TapKind,
    alive: Arc<AtomicBool>,
}

impl InputTap for FakeTap {
    fn kind(&self) -> TapKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for FakeTap {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

struct FakeSubscription {
    alive: Arc<AtomicBool>,
}

impl Subscription for FakeSubscription {}

impl Drop for FakeSubscription {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Platform for FakePlatform {
    fn probe(&self, capability: Capability) -> bool {
        !self.lock().denied.contains(&capability)
    }

    fn request(&self, capability: Capability) {
        let mut state = self.lock();
        state.requests.push(capability);
        if state.grant_on_request.contains(&capability) {
            state.denied.remove(&capability);
        }
    }

    fn install_input_tap(
        &self,
        kind: TapKind,
        sink: Weak<dyn InputSink>,
    ) -> Result<Box<dyn InputTap>, TrackerError> {
        let mut state = self.lock();
        if state.failing_taps.contains(&kind) {
            return Err(TrackerError::resource(kind.label(), "fake tap refused"));
        }
        *state.tap_installs.entry(kind).or_default() += 1;
        let alive = Arc::new(AtomicBool::new(true));
        state.taps.push(InstalledTap {
            kind,
            sink,
            alive: alive.clone(),
        });
        Ok(Box::new(FakeTap { kind, alive }))
    }

    fn frontmost_app(&self) -> Option<AppIdentity> {
        self.lock().frontmost.clone()
    }

    fn observe_app_activation(
        &self,
        sink: Weak<dyn ActivationSink>,
    ) -> Result<Box<dyn Subscription>, TrackerError> {
        let alive = Arc::new(AtomicBool::new(true));
        self.lock().observers.push(ObserverEntry {
            sink,
            alive: alive.clone(),
        });
        Ok(Box::new(FakeSubscription { alive }))
    }

    fn capture_screen(&self, method: CaptureMethod) -> Result<CapturedImage, TrackerError> {
        let mut state = self.lock();
        state.captures.push(method);
        if method == CaptureMethod::AllWindows && state.composite_fails {
            return Err(TrackerError::TransientIo("composite capture failed".into()));
        }
        Ok(tiny_image())
    }

    fn open_folder(&self, path: &Path) -> Result<(), TrackerError> {
        self.lock().opened.push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Default)]
struct FakeGitState {
    counts: HashMap<PathBuf, u64>,
    head_times: HashMap<PathBuf, DateTime<Utc>>,
    commits: HashMap<PathBuf, Vec<CommitStamp>>,
    failing: HashSet<PathBuf>,
    log_calls: Vec<PathBuf>,
}

/// Scripted revision-control runner. Repositories without a scripted count
/// fail like a missing repository would.
#[derive(Default)]
pub struct FakeGit {
    state: Mutex<FakeGitState>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeGitState> {
        self.state.lock().unwrap()
    }

    pub fn set_count(&self, repo: impl AsRef<Path>, count: u64) {
        self.lock().counts.insert(repo.as_ref().to_path_buf(), count);
    }

    pub fn set_head_time(&self, repo: impl AsRef<Path>, at: DateTime<Utc>) {
        self.lock().head_times.insert(repo.as_ref().to_path_buf(), at);
    }

    pub fn set_commits(&self, repo: impl AsRef<Path>, commits: Vec<CommitStamp>) {
        self.lock().commits.insert(repo.as_ref().to_path_buf(), commits);
    }

    pub fn fail(&self, repo: impl AsRef<Path>) {
        self.lock().failing.insert(repo.as_ref().to_path_buf());
    }

    pub fn recover(&self, repo: impl AsRef<Path>) {
        self.lock().failing.remove(repo.as_ref());
    }

    pub fn log_calls(&self) -> Vec<PathBuf> {
        self.lock().log_calls.clone()
    }

    fn check(&self, repo: &Path, command: &'static str) -> Result<(), GitError> {
        if self.lock().failing.contains(repo) {
            return Err(GitError::Exit {
                command,
                status: "exit status: 128".into(),
                stderr: "fatal: not a git repository".into(),
            });
        }
        Ok(())
    }
}

impl GitRunner for FakeGit {
    fn commit_count(&self, repo: &Path) -> Result<u64, GitError> {
        self.check(repo, "rev-list")?;
        self.lock()
            .counts
            .get(repo)
            .copied()
            .ok_or_else(|| GitError::Parse {
                command: "rev-list",
                output: String::new(),
            })
    }

    fn head_commit_time(&self, repo: &Path) -> Result<DateTime<Utc>, GitError> {
        self.check(repo, "log")?;
        self.lock()
            .head_times
            .get(repo)
            .copied()
            .ok_or_else(|| GitError::Parse {
                command: "log",
                output: String::new(),
            })
    }

    fn commits_between(
        &self,
        repo: &Path,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitStamp>, GitError> {
        self.lock().log_calls.push(repo.to_path_buf());
        self.check(repo, "log")?;
        Ok(self
            .lock()
            .commits
            .get(repo)
            .map(|commits| {
                commits
                    .iter()
                    .filter(|c| c.committed_at >= since && c.committed_at <= until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Keeps every write in memory.
#[derive(Default)]
pub struct RecordingPersistence {
    sessions: Mutex<Vec<SessionRecord>>,
    snapshots: Mutex<Vec<MetricSnapshot>>,
    screenshots: Mutex<Vec<ScreenshotRecord>>,
}

impl RecordingPersistence {
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn last_session(&self) -> Option<SessionRecord> {
        self.sessions.lock().unwrap().last().cloned()
    }

    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn screenshots(&self) -> Vec<ScreenshotRecord> {
        self.screenshots.lock().unwrap().clone()
    }
}

impl Persistence for RecordingPersistence {
    fn save_session(&self, session: SessionRecord) {
        self.sessions.lock().unwrap().push(session);
    }

    fn save_metric_snapshot(&self, snapshot: MetricSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    fn save_screenshot(&self, screenshot: ScreenshotRecord) {
        self.screenshots.lock().unwrap().push(screenshot);
    }
}
