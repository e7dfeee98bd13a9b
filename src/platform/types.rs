use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Accessibility,
    InputMonitoring,
    Camera,
    ScreenRecording,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Accessibility,
        Capability::InputMonitoring,
        Capability::Camera,
        Capability::ScreenRecording,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Accessibility => "Accessibility",
            Capability::InputMonitoring => "Input Monitoring",
            Capability::Camera => "Camera",
            Capability::ScreenRecording => "Screen Recording",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapKind {
    Mouse,
    Keyboard,
}

impl TapKind {
    /// Capability that must be granted before the channel may be created.
    pub fn required_capability(&self) -> Capability {
        match self {
            TapKind::Mouse => Capability::Accessibility,
            TapKind::Keyboard => Capability::InputMonitoring,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TapKind::Mouse => "mouse event tap",
            TapKind::Keyboard => "keyboard event tap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Other,
}

/// Platform-neutral view of a low-level input event as delivered by a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawInputEvent {
    MouseDown(MouseButton),
    MouseUp(MouseButton),
    MouseDragged(MouseButton),
    KeyDown { key_code: u16, autorepeat: bool },
    KeyUp { key_code: u16 },
    /// A modifier key changed state without a character key.
    FlagsChanged { key_code: u16 },
}

/// Receives events on the tap's own thread. Implementations must return quickly.
pub trait InputSink: Send + Sync {
    fn deliver(&self, event: RawInputEvent);
}

/// An installed interception channel. Dropping it disables the tap, removes its
/// run-loop registration and destroys it before returning.
pub trait InputTap: Send {
    fn kind(&self) -> TapKind;
    fn is_enabled(&self) -> bool;
}

/// Identity of a foreground application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
    pub bundle_id: Option<String>,
    pub pid: i32,
    pub name: Option<String>,
}

impl AppIdentity {
    /// Stable per-application key. Bundle identifiers survive relaunches; the pid
    /// is only used for processes that have none.
    pub fn stable_key(&self) -> String {
        match &self.bundle_id {
            Some(bundle_id) if !bundle_id.is_empty() => bundle_id.clone(),
            _ => format!("pid:{}", self.pid),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.bundle_id.as_deref())
            .unwrap_or("unknown")
    }
}

pub trait ActivationSink: Send + Sync {
    fn activated(&self, app: AppIdentity);
}

/// Live notification subscription; dropping it unsubscribes synchronously.
pub trait Subscription: Send {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMethod {
    /// Composite of every on-screen window across all displays.
    AllWindows,
    /// The main display only.
    MainDisplay,
}

/// Straight (non-premultiplied) RGBA8 pixels.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}
