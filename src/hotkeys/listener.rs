use std::collections::HashMap;

use global_hotkey::{hotkey::HotKey, GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use log::{error, info};
use tokio::sync::mpsc;

use super::{HotkeyAction, HotkeyRegistry};
use crate::error::TrackerError;

/// System-wide registration of a [`HotkeyRegistry`]. Must be created on the main
/// thread. Presses are forwarded as actions on `actions`; dropping the listener
/// unregisters every combo.
pub struct GlobalHotkeys {
    manager: GlobalHotKeyManager,
    registered: Vec<HotKey>,
}

impl GlobalHotkeys {
    pub fn register(
        registry: &HotkeyRegistry,
        actions: mpsc::UnboundedSender<HotkeyAction>,
    ) -> Result<Self, TrackerError> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|err| TrackerError::resource("global hotkey manager", err.to_string()))?;

        let mut registered = Vec::new();
        let mut by_id = HashMap::new();
        for binding in registry.bindings() {
            let hotkey = binding.combo.to_hotkey();
            if let Err(err) = manager.register(hotkey) {
                error!("Failed to register {} for {}: {err}", binding.combo, binding.action);
                continue;
            }
            info!("Registered {} for {}", binding.combo, binding.action);
            by_id.insert(hotkey.id(), binding.action);
            registered.push(hotkey);
        }

        GlobalHotKeyEvent::set_event_handler(Some(move |event: GlobalHotKeyEvent| {
            if event.state != HotKeyState::Pressed {
                return;
            }
            if let Some(action) = by_id.get(&event.id) {
                let _ = actions.send(*action);
            }
        }));

        Ok(Self {
            manager,
            registered,
        })
    }

    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }
}

impl Drop for GlobalHotkeys {
    fn drop(&mut self) {
        GlobalHotKeyEvent::set_event_handler(None::<fn(GlobalHotKeyEvent)>);
        if let Err(err) = self.manager.unregister_all(&self.registered) {
            error!("Failed to unregister hotkeys: {err}");
        }
    }
}
