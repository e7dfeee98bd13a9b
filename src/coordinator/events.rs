use log::{error, warn};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::db::ScreenshotRecord;
use crate::error::TrackerError;
use crate::git::{BackfillOutcome, PollOutcome};
use crate::platform::AppIdentity;

/// Identifies one `start()`..`stop()` span. Background results tagged with an
/// older run are dropped.
pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    MouseClick,
    Keystroke,
}

/// Everything that may change tracking state. Producers on other threads only
/// send these; the coordinator's fold task is the single writer.
#[derive(Debug)]
pub enum TrackerEvent {
    Input(InputKind),
    AppActivated(AppIdentity),
    /// Foreground app at (re)start; recorded without counting a shift.
    AppBaseline(Option<AppIdentity>),
    /// Activity observed outside the input taps, such as camera motion.
    ExternalActivity,
    Tick,
    ActivityCheck,
    PersistSnapshot,
    ScreenshotSaved {
        run: RunId,
        record: ScreenshotRecord,
    },
    GitPolled {
        run: RunId,
        outcome: PollOutcome,
    },
    BackfillStarted {
        run: RunId,
        generation: u64,
    },
    BackfillFinished {
        run: RunId,
        generation: u64,
        outcome: BackfillOutcome,
    },
    /// Acknowledged once every earlier event has been applied.
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "reason")]
pub enum ComponentState {
    #[default]
    Stopped,
    Running,
    Disabled(String),
}

impl ComponentState {
    /// Log the failure at the level its category calls for and report the
    /// component as disabled.
    pub fn disabled(component: &str, err: &TrackerError) -> Self {
        match err {
            TrackerError::PermissionDenied(_) | TrackerError::Unsupported(_) => {
                warn!("{component} disabled: {err}")
            }
            _ => error!("{component} disabled: {err}"),
        }
        ComponentState::Disabled(err.to_string())
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ComponentState::Running)
    }
}
