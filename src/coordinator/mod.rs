//! Tracking lifecycle: the event types producers send, the single-writer
//! state they fold into, and the coordinator that starts and stops everything.

mod controller;
pub mod events;
mod state;

pub use controller::{debug_mode_from_env, CoordinatorConfig, TrackingCoordinator};
pub use events::{ComponentState, InputKind, RunId, TrackerEvent};
pub use state::{
    ComponentStatuses, SessionCounters, TrackingSession, TrackingSnapshot, TrackingState,
    TrackingStatus,
};
