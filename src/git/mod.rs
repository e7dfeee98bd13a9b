//! Commit activity across local repositories: discovery under configured
//! roots, commit-count polling, and the one-time "earlier today" backfill.

mod backfill;
mod command;
mod discovery;
mod poller;
mod service;

pub use backfill::{scan_today_backfill, start_of_local_day, BackfillOutcome};
pub use command::{CommitStamp, GitCli, GitRunner};
pub use discovery::{discover_repositories, GitRoot};
pub use poller::{commit_delta, GitPoller, PollOutcome, RecentCommit, RepositoryRecord};
pub use service::{GitService, GitServiceConfig, REDISCOVER_EVERY_POLLS};
