//! Global key-combo bindings for the four tracker actions.
//!
//! A combo may be bound to at most one action. Rebinding an action replaces its
//! own previous combo; binding a combo that another action owns is rejected.

mod dispatch;
mod listener;

use std::{collections::HashMap, fmt, str::FromStr};

use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::settings::HotkeySettings;

pub use dispatch::{dispatch, HotkeyOutcome};
pub use listener::GlobalHotkeys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HotkeyAction {
    TogglePause,
    ScreenshotNow,
    OpenFolder,
    Quit,
}

impl HotkeyAction {
    pub const ALL: [HotkeyAction; 4] = [
        HotkeyAction::TogglePause,
        HotkeyAction::ScreenshotNow,
        HotkeyAction::OpenFolder,
        HotkeyAction::Quit,
    ];
}

impl fmt::Display for HotkeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HotkeyAction::TogglePause => "pause/resume",
            HotkeyAction::ScreenshotNow => "screenshot now",
            HotkeyAction::OpenFolder => "open screenshots folder",
            HotkeyAction::Quit => "quit",
        })
    }
}

const ALLOWED_MODIFIERS: Modifiers = Modifiers::SUPER
    .union(Modifiers::SHIFT)
    .union(Modifiers::ALT)
    .union(Modifiers::CONTROL);

/// A physical key plus a non-empty set of {command, shift, option, control}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub code: Code,
    pub modifiers: Modifiers,
}

impl KeyCombo {
    pub fn new(modifiers: Modifiers, code: Code) -> Self {
        Self { code, modifiers }
    }

    pub fn to_hotkey(self) -> HotKey {
        HotKey::new(Some(self.modifiers), self.code)
    }
}

impl FromStr for KeyCombo {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidHotkey {
            value: value.to_string(),
            reason,
        };

        let hotkey = HotKey::from_str(value).map_err(|err| invalid(err.to_string()))?;
        if hotkey.mods.is_empty() {
            return Err(invalid("at least one modifier is required".into()));
        }
        if !ALLOWED_MODIFIERS.contains(hotkey.mods) {
            return Err(invalid(
                "only command, shift, option and control are supported".into(),
            ));
        }

        Ok(Self {
            code: hotkey.key,
            modifiers: hotkey.mods,
        })
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (Modifiers::CONTROL, "Ctrl"),
            (Modifiers::ALT, "Option"),
            (Modifiers::SHIFT, "Shift"),
            (Modifiers::SUPER, "Cmd"),
        ] {
            if self.modifiers.contains(flag) {
                write!(f, "{name}+")?;
            }
        }
        write!(f, "{}", self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub combo: KeyCombo,
    pub action: HotkeyAction,
}

#[derive(Debug, Clone, Default)]
pub struct HotkeyRegistry {
    by_combo: HashMap<KeyCombo, HotkeyAction>,
    by_action: HashMap<HotkeyAction, KeyCombo>,
}

impl HotkeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &HotkeySettings) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (action, raw) in [
            (HotkeyAction::TogglePause, &settings.toggle_pause),
            (HotkeyAction::ScreenshotNow, &settings.screenshot_now),
            (HotkeyAction::OpenFolder, &settings.open_folder),
            (HotkeyAction::Quit, &settings.quit),
        ] {
            registry.bind(action, raw.parse()?)?;
        }
        Ok(registry)
    }

    pub fn bind(&mut self, action: HotkeyAction, combo: KeyCombo) -> Result<(), ConfigError> {
        if let Some(&existing) = self.by_combo.get(&combo) {
            if existing == action {
                return Ok(());
            }
            return Err(ConfigError::HotkeyConflict {
                combo,
                existing,
                requested: action,
            });
        }

        if let Some(previous) = self.by_action.insert(action, combo) {
            self.by_combo.remove(&previous);
        }
        self.by_combo.insert(combo, action);
        Ok(())
    }

    pub fn unbind(&mut self, action: HotkeyAction) -> Option<KeyCombo> {
        let combo = self.by_action.remove(&action)?;
        self.by_combo.remove(&combo);
        Some(combo)
    }

    pub fn action_for(&self, combo: &KeyCombo) -> Option<HotkeyAction> {
        self.by_combo.get(combo).copied()
    }

    pub fn combo_for(&self, action: HotkeyAction) -> Option<KeyCombo> {
        self.by_action.get(&action).copied()
    }

    /// Bindings in action order.
    pub fn bindings(&self) -> Vec<HotkeyBinding> {
        HotkeyAction::ALL
            .into_iter()
            .filter_map(|action| {
                self.combo_for(action)
                    .map(|combo| HotkeyBinding { combo, action })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd_shift(code: Code) -> KeyCombo {
        KeyCombo::new(Modifiers::SUPER | Modifiers::SHIFT, code)
    }

    #[test]
    fn duplicate_combo_for_another_action_is_rejected() {
        let mut registry = HotkeyRegistry::new();
        registry
            .bind(HotkeyAction::TogglePause, cmd_shift(Code::KeyP))
            .unwrap();

        let err = registry
            .bind(HotkeyAction::ScreenshotNow, cmd_shift(Code::KeyP))
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::HotkeyConflict {
                combo: cmd_shift(Code::KeyP),
                existing: HotkeyAction::TogglePause,
                requested: HotkeyAction::ScreenshotNow,
            }
        );
        assert_eq!(
            registry.action_for(&cmd_shift(Code::KeyP)),
            Some(HotkeyAction::TogglePause)
        );
        assert_eq!(registry.combo_for(HotkeyAction::ScreenshotNow), None);
    }

    #[test]
    fn rebinding_an_action_frees_its_old_combo() {
        let mut registry = HotkeyRegistry::new();
        registry
            .bind(HotkeyAction::Quit, cmd_shift(Code::KeyQ))
            .unwrap();
        registry
            .bind(HotkeyAction::Quit, cmd_shift(Code::KeyX))
            .unwrap();

        assert_eq!(registry.action_for(&cmd_shift(Code::KeyQ)), None);
        registry
            .bind(HotkeyAction::OpenFolder, cmd_shift(Code::KeyQ))
            .unwrap();
        assert_eq!(registry.bindings().len(), 2);
    }

    #[test]
    fn parses_modifier_strings() {
        let combo: KeyCombo = "cmd+shift+P".parse().unwrap();
        assert_eq!(combo, cmd_shift(Code::KeyP));

        let with_option: KeyCombo = "option+control+KeyS".parse().unwrap();
        assert_eq!(
            with_option,
            KeyCombo::new(Modifiers::ALT | Modifiers::CONTROL, Code::KeyS)
        );
    }

    #[test]
    fn rejects_bare_keys_and_garbage() {
        assert!(matches!(
            "P".parse::<KeyCombo>(),
            Err(ConfigError::InvalidHotkey { .. })
        ));
        assert!(matches!(
            "cmd+shift+NotAKey".parse::<KeyCombo>(),
            Err(ConfigError::InvalidHotkey { .. })
        ));
    }

    #[test]
    fn default_settings_bind_all_four_actions() {
        let registry = HotkeyRegistry::from_settings(&HotkeySettings::default()).unwrap();
        let actions: Vec<_> = registry.bindings().iter().map(|b| b.action).collect();
        assert_eq!(actions, HotkeyAction::ALL.to_vec());
    }
}
