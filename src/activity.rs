use std::time::Duration;

use log::info;
use tokio::sync::watch;
use tokio::time::Instant;

pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(300);
pub const ACTIVITY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityTransition {
    BecameActive,
    BecameInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityState {
    pub last_activity: Instant,
    pub is_active: bool,
}

/// Active/inactive derived from the recency of user input.
///
/// Activity flips the gate on immediately. Going inactive is only noticed by
/// [`ActivityGate::evaluate`], which the coordinator runs every
/// [`ACTIVITY_CHECK_INTERVAL`]. The current value is published on a watch
/// channel for the screenshot scheduler.
#[derive(Debug)]
pub struct ActivityGate {
    state: ActivityState,
    threshold: Duration,
    published: watch::Sender<bool>,
}

impl ActivityGate {
    /// Starts active, as if activity had just been observed at `now`.
    pub fn new(threshold: Duration, now: Instant) -> Self {
        let (published, _) = watch::channel(true);
        Self {
            state: ActivityState {
                last_activity: now,
                is_active: true,
            },
            threshold,
            published,
        }
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    pub fn last_activity(&self) -> Instant {
        self.state.last_activity
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: Duration) {
        self.threshold = threshold;
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.published.subscribe()
    }

    pub fn record_activity(&mut self, now: Instant) -> Option<ActivityTransition> {
        if now > self.state.last_activity {
            self.state.last_activity = now;
        }
        if self.state.is_active {
            return None;
        }
        self.set_active(true);
        Some(ActivityTransition::BecameActive)
    }

    pub fn evaluate(&mut self, now: Instant) -> Option<ActivityTransition> {
        let active = now.saturating_duration_since(self.state.last_activity) < self.threshold;
        if active == self.state.is_active {
            return None;
        }
        self.set_active(active);
        Some(if active {
            ActivityTransition::BecameActive
        } else {
            ActivityTransition::BecameInactive
        })
    }

    fn set_active(&mut self, active: bool) {
        self.state.is_active = active;
        self.published.send_replace(active);
        if active {
            info!("User activity resumed");
        } else {
            info!(
                "No activity for {}s; marking inactive",
                self.threshold.as_secs()
            );
        }
    }
}
