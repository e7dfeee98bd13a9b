use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use super::tap::TapWatcher;
use crate::coordinator::events::{ComponentState, InputKind, TrackerEvent};
use crate::permissions::PermissionSnapshot;
use crate::platform::{MouseButton, Platform, RawInputEvent, TapKind};

/// Left or right button-down transitions. Releases, drags and other buttons do not count.
pub fn qualifies_click(event: &RawInputEvent) -> Option<InputKind> {
    match event {
        RawInputEvent::MouseDown(MouseButton::Left | MouseButton::Right) => {
            Some(InputKind::MouseClick)
        }
        _ => None,
    }
}

/// Forwards clicks from the Accessibility-gated mouse tap.
pub struct MouseWatcher {
    tap: TapWatcher,
}

impl MouseWatcher {
    pub fn new(platform: Arc<dyn Platform>, events: UnboundedSender<TrackerEvent>) -> Self {
        Self {
            tap: TapWatcher::new(TapKind::Mouse, platform, events, qualifies_click),
        }
    }

    pub fn start(&mut self, permissions: &PermissionSnapshot) -> ComponentState {
        self.tap.start(permissions)
    }

    pub fn stop(&mut self) {
        self.tap.stop();
    }

    pub fn is_running(&self) -> bool {
        self.tap.is_running()
    }

    pub fn state(&self) -> ComponentState {
        self.tap.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Capability;
    use crate::test_utils::FakePlatform;
    use tokio::sync::mpsc;

    fn granted() -> PermissionSnapshot {
        PermissionSnapshot {
            accessibility: true,
            input_monitoring: true,
            camera: true,
            screen_recording: true,
        }
    }

    #[test]
    fn counts_exactly_the_clicks_delivered_while_running() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = MouseWatcher::new(platform.clone(), tx);

        platform.deliver(TapKind::Mouse, RawInputEvent::MouseDown(MouseButton::Left));
        assert!(rx.try_recv().is_err());

        assert_eq!(watcher.start(&granted()), ComponentState::Running);
        for _ in 0..4 {
            platform.deliver(TapKind::Mouse, RawInputEvent::MouseDown(MouseButton::Left));
            platform.deliver(TapKind::Mouse, RawInputEvent::MouseUp(MouseButton::Left));
        }
        platform.deliver(TapKind::Mouse, RawInputEvent::MouseDown(MouseButton::Right));
        platform.deliver(TapKind::Mouse, RawInputEvent::MouseDragged(MouseButton::Left));
        platform.deliver(TapKind::Mouse, RawInputEvent::MouseDown(MouseButton::Other));
        watcher.stop();
        platform.deliver(TapKind::Mouse, RawInputEvent::MouseDown(MouseButton::Left));

        let mut forwarded = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, TrackerEvent::Input(InputKind::MouseClick)));
            forwarded += 1;
        }
        assert_eq!(forwarded, 5);
    }

    #[test]
    fn never_creates_a_tap_without_accessibility() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = MouseWatcher::new(platform.clone(), tx);

        let mut permissions = granted();
        permissions.accessibility = false;

        let state = watcher.start(&permissions);
        assert!(matches!(state, ComponentState::Disabled(_)));
        assert_eq!(platform.tap_installs(TapKind::Mouse), 0);
        assert!(!watcher.is_running());
        assert_eq!(
            TapKind::Mouse.required_capability(),
            Capability::Accessibility
        );
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = MouseWatcher::new(platform.clone(), tx);

        watcher.stop();
        watcher.start(&granted());
        watcher.start(&granted());
        assert_eq!(platform.tap_installs(TapKind::Mouse), 1);
        assert_eq!(platform.live_taps(TapKind::Mouse), 1);

        watcher.stop();
        watcher.stop();
        assert_eq!(platform.live_taps(TapKind::Mouse), 0);
    }

    #[test]
    fn tap_creation_failure_disables_the_watcher() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_tap(TapKind::Mouse);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = MouseWatcher::new(platform.clone(), tx);

        assert!(matches!(
            watcher.start(&granted()),
            ComponentState::Disabled(_)
        ));
        assert!(!watcher.is_running());
    }

    #[test]
    fn dropped_owner_is_not_called_back() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = MouseWatcher::new(platform.clone(), tx);
        watcher.start(&granted());
        drop(watcher);

        assert_eq!(platform.live_taps(TapKind::Mouse), 0);
        platform.deliver(TapKind::Mouse, RawInputEvent::MouseDown(MouseButton::Left));
    }
}
