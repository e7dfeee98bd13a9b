//! Fallback for targets without a native backend. Every capability reports
//! "not granted", so watchers and the screenshot scheduler stay disabled while
//! git polling keeps working.

use std::path::Path;
use std::process::Command;
use std::sync::Weak;

use log::{debug, warn};

use super::{
    ActivationSink, AppIdentity, Capability, CaptureMethod, CapturedImage, InputSink, InputTap,
    Platform, Subscription, TapKind,
};
use crate::error::TrackerError;

pub struct HeadlessPlatform;

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for HeadlessPlatform {
    fn probe(&self, _capability: Capability) -> bool {
        false
    }

    fn request(&self, capability: Capability) {
        warn!("{capability} permission cannot be requested on this platform");
    }

    fn install_input_tap(
        &self,
        kind: TapKind,
        _sink: Weak<dyn InputSink>,
    ) -> Result<Box<dyn InputTap>, TrackerError> {
        Err(TrackerError::Unsupported(kind.label()))
    }

    fn frontmost_app(&self) -> Option<AppIdentity> {
        None
    }

    fn observe_app_activation(
        &self,
        _sink: Weak<dyn ActivationSink>,
    ) -> Result<Box<dyn Subscription>, TrackerError> {
        Err(TrackerError::Unsupported("app activation notifications"))
    }

    fn capture_screen(&self, _method: CaptureMethod) -> Result<CapturedImage, TrackerError> {
        Err(TrackerError::Unsupported("screen capture"))
    }

    fn open_folder(&self, path: &Path) -> Result<(), TrackerError> {
        debug!("Opening {} with xdg-open", path.display());
        Command::new("xdg-open")
            .arg(path)
            .spawn()
            .map(|_| ())
            .map_err(|err| TrackerError::TransientIo(format!("xdg-open failed: {err}")))
    }
}
