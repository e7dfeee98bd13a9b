//! OS seam for everything the tracking core needs from the host: permission
//! probes, global input interception, foreground-application notifications,
//! desktop capture and opening folders.
//!
//! Handles returned here release their OS resources on drop, so a watcher
//! that drops its handle has fully unsubscribed by the time the drop returns.

mod types;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(not(target_os = "macos"))]
mod headless;

use std::path::Path;
use std::sync::{mpsc, Arc, Weak};

use crate::error::TrackerError;

pub use types::{
    ActivationSink, AppIdentity, Capability, CaptureMethod, CapturedImage, InputSink, InputTap,
    MouseButton, RawInputEvent, Subscription, TapKind,
};

pub trait Platform: Send + Sync {
    /// Side-effect-free check of a single capability.
    fn probe(&self, capability: Capability) -> bool;

    /// Kick off the OS consent flow. Completion is observed by probing again later.
    fn request(&self, capability: Capability);

    /// Create, register and enable a global interception channel. The callback only
    /// holds `sink` weakly and drops events once the owner is gone.
    fn install_input_tap(
        &self,
        kind: TapKind,
        sink: Weak<dyn InputSink>,
    ) -> Result<Box<dyn InputTap>, TrackerError>;

    fn frontmost_app(&self) -> Option<AppIdentity>;

    fn observe_app_activation(
        &self,
        sink: Weak<dyn ActivationSink>,
    ) -> Result<Box<dyn Subscription>, TrackerError>;

    /// Blocking; call from a background thread.
    fn capture_screen(&self, method: CaptureMethod) -> Result<CapturedImage, TrackerError>;

    fn open_folder(&self, path: &Path) -> Result<(), TrackerError>;
}

#[cfg(target_os = "macos")]
pub fn native() -> Arc<dyn Platform> {
    Arc::new(macos::MacPlatform::new())
}

#[cfg(not(target_os = "macos"))]
pub fn native() -> Arc<dyn Platform> {
    Arc::new(headless::HeadlessPlatform::new())
}

/// Drive the main-thread event loop until `shutdown` fires (or its sender is dropped).
pub fn run_main_loop(shutdown: mpsc::Receiver<()>) {
    #[cfg(target_os = "macos")]
    {
        macos::run_main_loop(shutdown);
    }

    #[cfg(not(target_os = "macos"))]
    {
        let _ = shutdown.recv();
    }
}
