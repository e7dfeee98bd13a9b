use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveTime, Utc};
use log::warn;
use tokio_util::sync::CancellationToken;

use super::command::GitRunner;
use super::poller::RecentCommit;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub commits: u64,
    pub latest: Option<RecentCommit>,
    pub scanned: usize,
}

/// Midnight of `now`'s local calendar day.
pub fn start_of_local_day(now: DateTime<Local>) -> DateTime<Utc> {
    now.date_naive()
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .map(|midnight| midnight.with_timezone(&Utc))
        // Local midnight skipped by a DST jump.
        .unwrap_or_else(|| (now - chrono::Duration::hours(24)).with_timezone(&Utc))
}

/// Count commits in `[since, until)` across `repositories`. Cancellation is
/// checked before each repository; a cancelled scan returns `None`.
pub fn scan_today_backfill(
    repositories: &[PathBuf],
    runner: &dyn GitRunner,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Option<BackfillOutcome> {
    let mut outcome = BackfillOutcome::default();
    let mut seen = HashSet::new();

    for repo in repositories {
        if cancel.is_cancelled() {
            return None;
        }

        let commits = match runner.commits_between(repo, since, until) {
            Ok(commits) => commits,
            Err(err) => {
                warn!("Backfill skipped {}: {err}", repo.display());
                continue;
            }
        };
        outcome.scanned += 1;

        for commit in commits {
            // `--until` is inclusive; the baseline instant belongs to the poller.
            if commit.committed_at >= until || !seen.insert(commit.hash.clone()) {
                continue;
            }
            outcome.commits += 1;
            let newer = outcome
                .latest
                .as_ref()
                .map_or(true, |latest| commit.committed_at > latest.committed_at);
            if newer {
                outcome.latest = Some(RecentCommit {
                    repository: repo.clone(),
                    committed_at: commit.committed_at,
                });
            }
        }
    }

    if cancel.is_cancelled() {
        return None;
    }
    Some(outcome)
}
