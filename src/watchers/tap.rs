use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::coordinator::events::{ComponentState, InputKind, TrackerEvent};
use crate::error::TrackerError;
use crate::permissions::PermissionSnapshot;
use crate::platform::{InputSink, InputTap, Platform, RawInputEvent, TapKind};

pub(crate) type Qualifier = fn(&RawInputEvent) -> Option<InputKind>;

/// Runs on the tap thread: filter and forward. Nothing else.
struct TapSink {
    running: AtomicBool,
    qualify: Qualifier,
    events: UnboundedSender<TrackerEvent>,
}

impl InputSink for TapSink {
    fn deliver(&self, event: RawInputEvent) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        if let Some(kind) = (self.qualify)(&event) {
            let _ = self.events.send(TrackerEvent::Input(kind));
        }
    }
}

/// One global interception channel feeding the fold task.
pub(crate) struct TapWatcher {
    kind: TapKind,
    platform: Arc<dyn Platform>,
    sink: Arc<TapSink>,
    tap: Option<Box<dyn InputTap>>,
    state: ComponentState,
}

impl TapWatcher {
    pub(crate) fn new(
        kind: TapKind,
        platform: Arc<dyn Platform>,
        events: UnboundedSender<TrackerEvent>,
        qualify: Qualifier,
    ) -> Self {
        Self {
            kind,
            platform,
            sink: Arc::new(TapSink {
                running: AtomicBool::new(false),
                qualify,
                events,
            }),
            tap: None,
            state: ComponentState::Stopped,
        }
    }

    /// No-op when already running. The permission is checked before the tap is
    /// created so a missing grant never triggers a consent prompt from here.
    pub(crate) fn start(&mut self, permissions: &PermissionSnapshot) -> ComponentState {
        if self.tap.is_some() {
            return self.state.clone();
        }

        let capability = self.kind.required_capability();
        if !permissions.is_granted(capability) {
            self.state = ComponentState::disabled(
                self.kind.label(),
                &TrackerError::PermissionDenied(capability),
            );
            return self.state.clone();
        }

        let sink: Arc<dyn InputSink> = self.sink.clone();
        let weak: Weak<dyn InputSink> = Arc::downgrade(&sink);
        self.sink.running.store(true, Ordering::Release);

        match self.platform.install_input_tap(self.kind, weak) {
            Ok(tap) => {
                info!("{} started", self.kind.label());
                self.tap = Some(tap);
                self.state = ComponentState::Running;
            }
            Err(err) => {
                self.sink.running.store(false, Ordering::Release);
                self.state = ComponentState::disabled(self.kind.label(), &err);
            }
        }
        self.state.clone()
    }

    /// Safe to call at any time. The OS channel is gone when this returns.
    pub(crate) fn stop(&mut self) {
        self.sink.running.store(false, Ordering::Release);
        if let Some(tap) = self.tap.take() {
            drop(tap);
            info!("{} stopped", self.kind.label());
        }
        self.state = ComponentState::Stopped;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.tap.is_some()
    }

    pub(crate) fn state(&self) -> ComponentState {
        self.state.clone()
    }
}

impl Drop for TapWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
