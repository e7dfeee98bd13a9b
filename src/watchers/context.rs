use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::coordinator::events::{ComponentState, TrackerEvent};
use crate::platform::{ActivationSink, AppIdentity, Platform, Subscription};

/// Counts a shift only when the foreground app's stable key changes.
#[derive(Debug, Default, Clone)]
pub struct ContextShiftDetector {
    last: Option<String>,
}

impl ContextShiftDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `app` as current without counting anything.
    pub fn seed(&mut self, app: Option<&AppIdentity>) {
        if let Some(app) = app {
            self.last = Some(app.stable_key());
        }
    }

    /// Returns true when `app` differs from the previously recorded app. The
    /// first observation only establishes the baseline.
    pub fn observe(&mut self, app: &AppIdentity) -> bool {
        let key = app.stable_key();
        match self.last.replace(key.clone()) {
            Some(previous) => previous != key,
            None => false,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

struct ContextSink {
    tracking: AtomicBool,
    events: UnboundedSender<TrackerEvent>,
}

impl ActivationSink for ContextSink {
    fn activated(&self, app: AppIdentity) {
        if self.tracking.load(Ordering::Acquire) {
            let _ = self.events.send(TrackerEvent::AppActivated(app));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    Uninitialized,
    Tracking,
    Stopped,
}

/// Foreground-application observer.
pub struct ContextWatcher {
    platform: Arc<dyn Platform>,
    sink: Arc<ContextSink>,
    subscription: Option<Box<dyn Subscription>>,
    phase: ContextPhase,
    state: ComponentState,
}

impl ContextWatcher {
    pub fn new(platform: Arc<dyn Platform>, events: UnboundedSender<TrackerEvent>) -> Self {
        Self {
            platform,
            sink: Arc::new(ContextSink {
                tracking: AtomicBool::new(false),
                events,
            }),
            subscription: None,
            phase: ContextPhase::Uninitialized,
            state: ComponentState::Stopped,
        }
    }

    /// Subscribes and reports the current foreground app as the baseline.
    pub fn start(&mut self) -> ComponentState {
        if self.phase == ContextPhase::Tracking {
            return self.state.clone();
        }

        let sink: Arc<dyn ActivationSink> = self.sink.clone();
        let weak: Weak<dyn ActivationSink> = Arc::downgrade(&sink);
        self.sink.tracking.store(true, Ordering::Release);

        match self.platform.observe_app_activation(weak) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.phase = ContextPhase::Tracking;
                self.state = ComponentState::Running;
                let baseline = self.platform.frontmost_app();
                if let Some(app) = &baseline {
                    info!("Context tracking started in {}", app.display_name());
                }
                let _ = self.sink.events.send(TrackerEvent::AppBaseline(baseline));
            }
            Err(err) => {
                self.sink.tracking.store(false, Ordering::Release);
                self.state = ComponentState::disabled("app activation observer", &err);
            }
        }
        self.state.clone()
    }

    /// The observer is removed before this returns.
    pub fn stop(&mut self) {
        self.sink.tracking.store(false, Ordering::Release);
        self.subscription = None;
        if self.phase == ContextPhase::Tracking {
            self.phase = ContextPhase::Stopped;
            info!("Context tracking stopped");
        }
        self.state = ComponentState::Stopped;
    }

    pub fn phase(&self) -> ContextPhase {
        self.phase
    }

    pub fn state(&self) -> ComponentState {
        self.state.clone()
    }
}

impl Drop for ContextWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
