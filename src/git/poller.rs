use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::command::GitRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub path: PathBuf,
    /// `None` until the first successful probe.
    pub last_known_commit_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentCommit {
    pub repository: PathBuf,
    pub committed_at: DateTime<Utc>,
}

impl RecentCommit {
    pub fn project_name(&self) -> String {
        self.repository
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.repository.display().to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub new_commits: u64,
    pub most_recent: Option<RecentCommit>,
    pub probed: usize,
    pub failed: usize,
}

/// Commit-count deltas across a set of repositories.
#[derive(Debug, Default)]
pub struct GitPoller {
    repositories: BTreeMap<PathBuf, RepositoryRecord>,
}

impl GitPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds repositories not seen before; existing records keep their counts.
    /// Returns how many were new.
    pub fn add_repositories<I>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut added = 0;
        for path in paths {
            self.repositories.entry(path.clone()).or_insert_with(|| {
                added += 1;
                RepositoryRecord {
                    path,
                    last_known_commit_count: None,
                }
            });
        }
        added
    }

    pub fn repositories(&self) -> impl Iterator<Item = &RepositoryRecord> {
        self.repositories.values()
    }

    pub fn repository_paths(&self) -> Vec<PathBuf> {
        self.repositories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Probe every repository once. A failing repository is skipped and keeps
    /// its previous count, so it is simply retried next cycle.
    pub fn poll_once(&mut self, runner: &dyn GitRunner) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        for record in self.repositories.values_mut() {
            let current = match runner.commit_count(&record.path) {
                Ok(count) => count,
                Err(err) => {
                    warn!("Skipping {} this cycle: {err}", record.path.display());
                    outcome.failed += 1;
                    continue;
                }
            };
            outcome.probed += 1;

            let previous = record.last_known_commit_count.replace(current);
            let delta = commit_delta(&record.path, previous, current);
            if delta == 0 {
                continue;
            }
            outcome.new_commits += delta;

            let committed_at = runner.head_commit_time(&record.path).unwrap_or_else(|err| {
                debug!("No head time for {}: {err}", record.path.display());
                Utc::now()
            });
            let newer = outcome
                .most_recent
                .as_ref()
                .map_or(true, |recent| committed_at > recent.committed_at);
            if newer {
                outcome.most_recent = Some(RecentCommit {
                    repository: record.path.clone(),
                    committed_at,
                });
            }
        }

        outcome
    }
}

/// New commits between two probes. The first probe only sets the baseline, and
/// a shrinking count (rebase, reset, branch switch) counts as nothing new.
pub fn commit_delta(repo: &Path, previous: Option<u64>, current: u64) -> u64 {
    match previous {
        None => 0,
        Some(previous) if current >= previous => current - previous,
        Some(previous) => {
            debug!(
                "Commit count in {} went from {previous} to {current}; treating as no new commits",
                repo.display()
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeGit;

    #[test]
    fn delta_is_never_negative() {
        let repo = Path::new("/repo");
        assert_eq!(commit_delta(repo, Some(10), 10), 0);
        assert_eq!(commit_delta(repo, Some(10), 13), 3);
        assert_eq!(commit_delta(repo, Some(10), 9), 0);
        assert_eq!(commit_delta(repo, None, 250), 0);
    }

    #[test]
    fn first_poll_is_a_baseline() {
        let git = FakeGit::new();
        git.set_count("/code/api", 120);
        let mut poller = GitPoller::new();
        poller.add_repositories([PathBuf::from("/code/api")]);

        let outcome = poller.poll_once(&git);
        assert_eq!(outcome.new_commits, 0);
        assert_eq!(outcome.probed, 1);
        assert_eq!(
            poller.repositories().next().unwrap().last_known_commit_count,
            Some(120)
        );
    }

    #[test]
    fn sums_deltas_and_tracks_most_recent_project() {
        let git = FakeGit::new();
        git.set_count("/code/api", 10);
        git.set_count("/code/web", 20);
        let mut poller = GitPoller::new();
        poller.add_repositories([PathBuf::from("/code/api"), PathBuf::from("/code/web")]);
        poller.poll_once(&git);

        let now = Utc::now();
        git.set_count("/code/api", 12);
        git.set_head_time("/code/api", now - chrono::Duration::minutes(5));
        git.set_count("/code/web", 21);
        git.set_head_time("/code/web", now);

        let outcome = poller.poll_once(&git);
        assert_eq!(outcome.new_commits, 3);
        let recent = outcome.most_recent.unwrap();
        assert_eq!(recent.repository, PathBuf::from("/code/web"));
        assert_eq!(recent.project_name(), "web");
    }

    #[test]
    fn rewritten_history_then_new_commit() {
        let git = FakeGit::new();
        git.set_count("/code/api", 10);
        let mut poller = GitPoller::new();
        poller.add_repositories([PathBuf::from("/code/api")]);
        poller.poll_once(&git);

        git.set_count("/code/api", 9);
        assert_eq!(poller.poll_once(&git).new_commits, 0);

        git.set_count("/code/api", 10);
        assert_eq!(poller.poll_once(&git).new_commits, 1);
    }

    #[test]
    fn one_failing_repository_does_not_stop_the_others() {
        let git = FakeGit::new();
        git.set_count("/code/api", 5);
        git.set_count("/code/broken", 1);
        git.set_count("/code/web", 7);
        let mut poller = GitPoller::new();
        poller.add_repositories(
            ["/code/api", "/code/broken", "/code/web"].map(PathBuf::from),
        );
        poller.poll_once(&git);

        git.fail("/code/broken");
        git.set_count("/code/api", 6);
        git.set_count("/code/web", 9);
        let outcome = poller.poll_once(&git);
        assert_eq!(outcome.new_commits, 3);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.probed, 2);

        git.recover("/code/broken");
        git.set_count("/code/broken", 2);
        assert_eq!(poller.poll_once(&git).new_commits, 1);
    }

    #[test]
    fn rediscovery_keeps_existing_counts() {
        let git = FakeGit::new();
        git.set_count("/code/api", 5);
        let mut poller = GitPoller::new();
        poller.add_repositories([PathBuf::from("/code/api")]);
        poller.poll_once(&git);

        let added = poller.add_repositories(["/code/api", "/code/new"].map(PathBuf::from));
        assert_eq!(added, 1);
        git.set_count("/code/new", 40);
        assert_eq!(poller.poll_once(&git).new_commits, 0);
        assert_eq!(poller.len(), 2);
    }
}
