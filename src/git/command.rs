use std::path::Path;
use std::process::{Command, Output};

use chrono::{DateTime, Utc};

use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStamp {
    pub hash: String,
    pub committed_at: DateTime<Utc>,
}

/// Blocking revision-control queries. Run these off the async executor.
pub trait GitRunner: Send + Sync {
    /// Commits reachable from `HEAD`.
    fn commit_count(&self, repo: &Path) -> Result<u64, GitError>;

    fn head_commit_time(&self, repo: &Path) -> Result<DateTime<Utc>, GitError>;

    /// Non-merge commits whose committer date falls within `[since, until]`.
    fn commits_between(
        &self,
        repo: &Path,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitStamp>, GitError>;
}

/// Shells out to the `git` binary on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, repo: &Path, command: &'static str, args: &[&str]) -> Result<String, GitError> {
        let Output {
            status,
            stdout,
            stderr,
        } = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()?;

        if !status.success() {
            return Err(GitError::Exit {
                command,
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

impl GitRunner for GitCli {
    fn commit_count(&self, repo: &Path) -> Result<u64, GitError> {
        let output = self.run(repo, "rev-list", &["rev-list", "--count", "HEAD"])?;
        parse_count(&output)
    }

    fn head_commit_time(&self, repo: &Path) -> Result<DateTime<Utc>, GitError> {
        let output = self.run(repo, "log", &["log", "-1", "--format=%cI"])?;
        parse_timestamp(output.trim()).ok_or(GitError::Parse {
            command: "log",
            output,
        })
    }

    fn commits_between(
        &self,
        repo: &Path,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitStamp>, GitError> {
        let since = format!("--since={}", since.to_rfc3339());
        let until = format!("--until={}", until.to_rfc3339());
        let output = self.run(
            repo,
            "log",
            &[
                "log",
                &since,
                &until,
                "--no-merges",
                "--pretty=format:%H|%cI",
            ],
        )?;
        parse_commit_log(&output)
    }
}

pub(crate) fn parse_count(output: &str) -> Result<u64, GitError> {
    output.trim().parse().map_err(|_| GitError::Parse {
        command: "rev-list",
        output: output.to_string(),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One `<hash>|<iso8601>` pair per line. Any malformed line rejects the whole
/// output so a partial parse is never mistaken for the real commit list.
pub(crate) fn parse_commit_log(output: &str) -> Result<Vec<CommitStamp>, GitError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parsed = line.split_once('|').and_then(|(hash, date)| {
                let committed_at = parse_timestamp(date.trim())?;
                (!hash.is_empty()).then(|| CommitStamp {
                    hash: hash.trim().to_string(),
                    committed_at,
                })
            });
            parsed.ok_or_else(|| GitError::Parse {
                command: "log",
                output: line.to_string(),
            })
        })
        .collect()
}
