use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use super::tap::TapWatcher;
use crate::coordinator::events::{ComponentState, InputKind, TrackerEvent};
use crate::permissions::PermissionSnapshot;
use crate::platform::{Platform, RawInputEvent, TapKind};

/// Virtual key codes 54..=63: right/left command, shift, caps lock, option,
/// control, right shift/option/control and function.
const MODIFIER_KEY_CODES: std::ops::RangeInclusive<u16> = 54..=63;

pub fn is_modifier_key(key_code: u16) -> bool {
    MODIFIER_KEY_CODES.contains(&key_code)
}

/// Physical key-down transitions of non-modifier keys. Held modifiers do not
/// matter; the character key is what counts.
pub fn qualifies_keystroke(event: &RawInputEvent) -> Option<InputKind> {
    match event {
        RawInputEvent::KeyDown {
            key_code,
            autorepeat: false,
        } if !is_modifier_key(*key_code) => Some(InputKind::Keystroke),
        _ => None,
    }
}

/// Forwards keystrokes from the Input Monitoring-gated keyboard tap.
pub struct KeyWatcher {
    tap: TapWatcher,
}

impl KeyWatcher {
    pub fn new(platform: Arc<dyn Platform>, events: UnboundedSender<TrackerEvent>) -> Self {
        Self {
            tap: TapWatcher::new(TapKind::Keyboard, platform, events, qualifies_keystroke),
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
    use crate::test_utils::FakePlatform;
    use tokio::sync::mpsc;

    const KEY_A: u16 = 0;
    const KEY_P: u16 = 35;
    const SHIFT: u16 = 56;
    const COMMAND: u16 = 55;

    fn key_down(key_code: u16) -> RawInputEvent {
        RawInputEvent::KeyDown {
            key_code,
            autorepeat: false,
        }
    }

    #[test]
    fn bare_modifiers_never_count() {
        for code in [SHIFT, COMMAND, 58, 59, 63] {
            assert_eq!(qualifies_keystroke(&key_down(code)), None);
            assert_eq!(
                qualifies_keystroke(&RawInputEvent::FlagsChanged { key_code: code }),
                None
            );
        }
    }

    #[test]
    fn autorepeat_and_key_up_do_not_count() {
        assert_eq!(
            qualifies_keystroke(&RawInputEvent::KeyDown {
                key_code: KEY_A,
                autorepeat: true
            }),
            None
        );
        assert_eq!(
            qualifies_keystroke(&RawInputEvent::KeyUp { key_code: KEY_A }),
            None
        );
    }

    #[test]
    fn character_key_with_modifiers_held_counts_once() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = KeyWatcher::new(platform.clone(), tx);
        watcher.start(&PermissionSnapshot {
            accessibility: false,
            input_monitoring: true,
            camera: false,
            screen_recording: false,
        });

        // Cmd+Shift+P as the tap sees it.
        platform.deliver(TapKind::Keyboard, RawInputEvent::FlagsChanged { key_code: COMMAND });
        platform.deliver(TapKind::Keyboard, RawInputEvent::FlagsChanged { key_code: SHIFT });
        platform.deliver(TapKind::Keyboard, key_down(KEY_P));
        platform.deliver(TapKind::Keyboard, RawInputEvent::KeyUp { key_code: KEY_P });
        platform.deliver(TapKind::Keyboard, RawInputEvent::FlagsChanged { key_code: SHIFT });
        platform.deliver(TapKind::Keyboard, RawInputEvent::FlagsChanged { key_code: COMMAND });

        assert!(matches!(
            rx.try_recv(),
            Ok(TrackerEvent::Input(InputKind::Keystroke))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn requires_input_monitoring() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = KeyWatcher::new(platform.clone(), tx);

        let state = watcher.start(&PermissionSnapshot {
            accessibility: true,
            input_monitoring: false,
            camera: true,
            screen_recording: true,
        });

        assert!(matches!(state, ComponentState::Disabled(_)));
        assert_eq!(platform.tap_installs(TapKind::Keyboard), 0);
    }
}
