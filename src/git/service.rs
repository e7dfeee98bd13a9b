use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::backfill::{scan_today_backfill, start_of_local_day};
use super::command::GitRunner;
use super::discovery::{discover_repositories, GitRoot};
use super::poller::GitPoller;
use crate::coordinator::events::{ComponentState, RunId, TrackerEvent};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Roots are walked again every this many polls.
pub const REDISCOVER_EVERY_POLLS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitServiceConfig {
    pub roots: Vec<GitRoot>,
    pub poll_interval: Duration,
}

#[derive(Debug)]
enum Control {
    CancelBackfill,
    ResumeBackfill,
}

/// Background discovery, polling and the one-time backfill. Results reach the
/// coordinator as [`TrackerEvent`]s tagged with the run they belong to.
pub struct GitService {
    runner: Arc<dyn GitRunner>,
    config: GitServiceConfig,
    control: Option<UnboundedSender<Control>>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl GitService {
    pub fn new(runner: Arc<dyn GitRunner>, config: GitServiceConfig) -> Self {
        Self {
            runner,
            config,
            control: None,
            cancel: None,
            handle: None,
        }
    }

    pub fn start(&mut self, run: RunId, events: UnboundedSender<TrackerEvent>) -> ComponentState {
        if self.handle.is_some() {
            return ComponentState::Running;
        }

        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let worker = GitWorker {
            run,
            runner: self.runner.clone(),
            config: self.config.clone(),
            events,
            cancel: cancel.clone(),
            poller: Some(GitPoller::new()),
            polls: 0,
            backfill: BackfillSlot::default(),
        };

        self.handle = Some(tokio::spawn(worker.run(control_rx)));
        self.cancel = Some(cancel);
        self.control = Some(control_tx);
        ComponentState::Running
    }

    /// Cancels the loop and any backfill without waiting. A poll already
    /// running in the blocking pool finishes but its result is discarded.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.control = None;
        self.handle = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn cancel_backfill(&self) {
        self.send(Control::CancelBackfill);
    }

    /// Re-runs the backfill if it never completed.
    pub fn resume_backfill(&self) {
        self.send(Control::ResumeBackfill);
    }

    /// Takes effect on the next `start()`.
    pub fn set_config(&mut self, config: GitServiceConfig) {
        self.config = config;
    }

    fn send(&self, control: Control) {
        if let Some(tx) = &self.control {
            let _ = tx.send(control);
        }
    }
}

impl Drop for GitService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct BackfillSlot {
    generation: u64,
    baseline_at: Option<DateTime<Utc>>,
    completed: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    suspended: bool,
}

impl BackfillSlot {
    fn in_flight(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.handle = None;
    }
}

struct GitWorker {
    run: RunId,
    runner: Arc<dyn GitRunner>,
    config: GitServiceConfig,
    events: UnboundedSender<TrackerEvent>,
    cancel: CancellationToken,
    poller: Option<GitPoller>,
    polls: u64,
    backfill: BackfillSlot,
}

impl GitWorker {
    async fn run(mut self, mut control: UnboundedReceiver<Control>) {
        self.rediscover().await;

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.backfill.cancel();
                    log_info!("git service shutting down");
                    break;
                }
                Some(command) = control.recv() => match command {
                    Control::CancelBackfill => {
                        self.backfill.suspended = true;
                        if self.backfill.in_flight() {
                            log_info!("cancelling git backfill");
                        }
                        self.backfill.cancel();
                    }
                    Control::ResumeBackfill => {
                        self.backfill.suspended = false;
                        self.maybe_spawn_backfill();
                    }
                },
                _ = ticker.tick() => {
                    if self.polls > 0 && self.polls % REDISCOVER_EVERY_POLLS == 0 {
                        self.rediscover().await;
                    }
                    if !self.poll().await {
                        break;
                    }
                    self.maybe_spawn_backfill();
                }
            }
        }
    }

    async fn rediscover(&mut self) {
        let roots = self.config.roots.clone();
        match tokio::task::spawn_blocking(move || discover_repositories(&roots)).await {
            Ok(found) => {
                if let Some(poller) = self.poller.as_mut() {
                    let added = poller.add_repositories(found);
                    if added > 0 {
                        log_info!("tracking {added} new repositories ({} total)", poller.len());
                    }
                }
            }
            Err(err) => log_error!("repository discovery failed: {err}"),
        }
    }

    /// Returns false if the poller was lost and the loop cannot continue.
    async fn poll(&mut self) -> bool {
        let Some(mut poller) = self.poller.take() else {
            return false;
        };
        let runner = self.runner.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = poller.poll_once(runner.as_ref());
            (poller, outcome)
        })
        .await;

        let (poller, outcome) = match joined {
            Ok(result) => result,
            Err(err) => {
                log_error!("git poll task failed: {err}");
                return false;
            }
        };
        self.poller = Some(poller);
        self.polls += 1;

        if self.cancel.is_cancelled() {
            return true;
        }
        if self.backfill.baseline_at.is_none() {
            self.backfill.baseline_at = Some(Utc::now());
        }
        if outcome.failed > 0 {
            log_warn!("{} repositories failed to report commit counts", outcome.failed);
        }
        if outcome.new_commits > 0 {
            log_debug!("{} new commits this cycle", outcome.new_commits);
        }
        let _ = self.events.send(TrackerEvent::GitPolled {
            run: self.run,
            outcome,
        });
        true
    }

    fn maybe_spawn_backfill(&mut self) {
        let slot = &mut self.backfill;
        if slot.suspended || slot.in_flight() || slot.completed.load(Ordering::Acquire) {
            return;
        }
        let (Some(until), Some(poller)) = (slot.baseline_at, self.poller.as_ref()) else {
            return;
        };

        let repositories: Vec<PathBuf> = poller.repository_paths();
        let since = start_of_local_day(until.with_timezone(&Local));
        slot.generation += 1;
        let generation = slot.generation;
        let token = self.cancel.child_token();
        slot.cancel = Some(token.clone());

        let _ = self.events.send(TrackerEvent::BackfillStarted {
            run: self.run,
            generation,
        });
        log_info!(
            "backfilling commits since {} across {} repositories",
            since.with_timezone(&Local).format("%H:%M"),
            repositories.len()
        );

        let run = self.run;
        let runner = self.runner.clone();
        let events = self.events.clone();
        let completed = slot.completed.clone();
        slot.handle = Some(tokio::task::spawn_blocking(move || {
            let Some(outcome) =
                scan_today_backfill(&repositories, runner.as_ref(), since, until, &token)
            else {
                return;
            };
            if token.is_cancelled() {
                return;
            }
            completed.store(true, Ordering::Release);
            let _ = events.send(TrackerEvent::BackfillFinished {
                run,
                generation,
                outcome,
            });
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::command::CommitStamp;
    use crate::test_utils::FakeGit;
    use std::fs;
    use tempfile::TempDir;

    async fn next_event(rx: &mut UnboundedReceiver<TrackerEvent>) -> TrackerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for git event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn polls_then_backfills_todays_commits() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("api");
        fs::create_dir_all(repo.join(".git")).unwrap();

        let git = Arc::new(FakeGit::new());
        git.set_count(&repo, 10);
        git.set_commits(
            &repo,
            vec![CommitStamp {
                hash: "abc".into(),
                committed_at: Utc::now() - chrono::Duration::seconds(1),
            }],
        );

        let mut service = GitService::new(
            git.clone(),
            GitServiceConfig {
                roots: vec![GitRoot {
                    path: dir.path().to_path_buf(),
                    max_depth: 2,
                }],
                poll_interval: Duration::from_secs(60),
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(service.start(7, tx).is_running());

        match next_event(&mut rx).await {
            TrackerEvent::GitPolled { run, outcome } => {
                assert_eq!(run, 7);
                assert_eq!(outcome.probed, 1);
                assert_eq!(outcome.new_commits, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            TrackerEvent::BackfillStarted { run: 7, generation: 1 }
        ));
        match next_event(&mut rx).await {
            TrackerEvent::BackfillFinished {
                generation, outcome, ..
            } => {
                assert_eq!(generation, 1);
                assert!(outcome.commits <= 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        service.stop();
        assert!(!service.is_running());
    }
}
