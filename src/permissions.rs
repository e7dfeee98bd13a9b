use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::platform::{Capability, Platform};

/// The OS has no completion callback for most consent dialogs, so a request is
/// followed by a re-check after this delay.
pub const REQUEST_RECHECK_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSnapshot {
    pub accessibility: bool,
    pub input_monitoring: bool,
    pub camera: bool,
    pub screen_recording: bool,
}

impl PermissionSnapshot {
    pub fn all_granted(&self) -> bool {
        self.accessibility && self.input_monitoring && self.camera && self.screen_recording
    }

    pub fn is_granted(&self, capability: Capability) -> bool {
        match capability {
            Capability::Accessibility => self.accessibility,
            Capability::InputMonitoring => self.input_monitoring,
            Capability::Camera => self.camera,
            Capability::ScreenRecording => self.screen_recording,
        }
    }

    pub fn missing(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|capability| !self.is_granted(*capability))
            .collect()
    }
}

/// Current permission status, re-checkable at any time. The latest snapshot is
/// published so permission gaps stay visible until the user resolves them.
#[derive(Clone)]
pub struct PermissionState {
    platform: Arc<dyn Platform>,
    latest: Arc<watch::Sender<PermissionSnapshot>>,
}

impl PermissionState {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let (latest, _) = watch::channel(PermissionSnapshot::default());
        Self {
            platform,
            latest: Arc::new(latest),
        }
    }

    pub fn check_all(&self) -> PermissionSnapshot {
        let snapshot = PermissionSnapshot {
            accessibility: self.platform.probe(Capability::Accessibility),
            input_monitoring: self.platform.probe(Capability::InputMonitoring),
            camera: self.platform.probe(Capability::Camera),
            screen_recording: self.platform.probe(Capability::ScreenRecording),
        };

        let previous = *self.latest.borrow();
        if previous != snapshot {
            let missing = snapshot.missing();
            if missing.is_empty() {
                info!("All permissions granted");
            } else {
                let names: Vec<&str> = missing.iter().map(Capability::as_str).collect();
                warn!("Missing permissions: {}", names.join(", "));
            }
        }
        self.latest.send_replace(snapshot);
        snapshot
    }

    pub fn latest(&self) -> PermissionSnapshot {
        *self.latest.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionSnapshot> {
        self.latest.subscribe()
    }

    /// Trigger the consent flow for one capability and report the state observed
    /// after the recheck delay.
    pub async fn request(&self, capability: Capability) -> PermissionSnapshot {
        self.platform.request(capability);
        tokio::time::sleep(REQUEST_RECHECK_DELAY).await;
        self.check_all()
    }
}
