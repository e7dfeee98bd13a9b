//! Error taxonomy for the tracking core.
//!
//! Permission gaps and resource-creation failures disable the affected component
//! without crashing; transient I/O failures are skipped for one cycle. Data
//! inconsistencies (negative commit deltas, superseded backfills) never become
//! errors and are handled where they are detected.

use thiserror::Error;

use crate::hotkeys::{HotkeyAction, KeyCombo};
use crate::platform::Capability;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// A capability probe reported "not granted".
    #[error("{0} permission not granted")]
    PermissionDenied(Capability),

    /// An interception channel, observer or other OS resource could not be created.
    #[error("failed to create {resource}: {reason}")]
    ResourceCreation {
        resource: &'static str,
        reason: String,
    },

    /// A screenshot write or subprocess call failed; retried next cycle.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// The current platform has no implementation for this operation.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TrackerError {
    pub fn resource(resource: &'static str, reason: impl Into<String>) -> Self {
        Self::ResourceCreation {
            resource,
            reason: reason.into(),
        }
    }

    /// Whether the failing component should report itself as disabled rather than retry.
    pub fn disables_component(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::ResourceCreation { .. } | Self::Unsupported(_)
        )
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        Self::TransientIo(err.to_string())
    }
}

impl From<image::ImageError> for TrackerError {
    fn from(err: image::ImageError) -> Self {
        Self::TransientIo(err.to_string())
    }
}

/// User-facing configuration mistakes. Surfaced, never silently resolved.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{combo} is already bound to {existing}; refusing to bind it to {requested}")]
    HotkeyConflict {
        combo: KeyCombo,
        existing: HotkeyAction,
        requested: HotkeyAction,
    },

    #[error("invalid hotkey '{value}': {reason}")]
    InvalidHotkey { value: String, reason: String },

    #[error("{field} must be between {min} and {max} seconds (got {value})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{field} must be between {min} and {max} (got {value})")]
    InvalidRatio {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to launch git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} exited with {status}: {stderr}")]
    Exit {
        command: &'static str,
        status: String,
        stderr: String,
    },

    #[error("unexpected git {command} output: {output}")]
    Parse {
        command: &'static str,
        output: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_and_resource_failures_disable_components() {
        assert!(TrackerError::PermissionDenied(Capability::Camera).disables_component());
        assert!(TrackerError::resource("event tap", "null port").disables_component());
        assert!(!TrackerError::TransientIo("disk full".into()).disables_component());
    }

    #[test]
    fn resource_error_names_the_resource() {
        let err = TrackerError::resource("mouse event tap", "CGEventTapCreate returned null");
        assert_eq!(
            err.to_string(),
            "failed to create mouse event tap: CGEventTapCreate returned null"
        );
    }
}
