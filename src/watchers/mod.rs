//! Global input and foreground-application watchers. Each watcher forwards
//! qualifying events to the coordinator and never mutates session state itself.

mod context;
mod keyboard;
mod mouse;
mod tap;

pub use context::{ContextPhase, ContextShiftDetector, ContextWatcher};
pub use keyboard::{is_modifier_key, qualifies_keystroke, KeyWatcher};
pub use mouse::{qualifies_click, MouseWatcher};
