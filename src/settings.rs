use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::error::ConfigError;
use crate::git::GitRoot;
use crate::hotkeys::HotkeyRegistry;

pub const SCREENSHOT_INTERVAL_MIN_SECS: u64 = 10;
pub const SCREENSHOT_INTERVAL_MAX_SECS: u64 = 600;
pub const INACTIVITY_THRESHOLD_MIN_SECS: u64 = 30;
pub const GIT_POLL_INTERVAL_MIN_SECS: u64 = 10;
const HUD_OPACITY_MIN: f64 = 0.2;
const HUD_OPACITY_MAX: f64 = 1.0;
const DEFAULT_ROOT_DEPTH: usize = 3;

pub fn screenshot_interval(secs: u64) -> Result<Duration, ConfigError> {
    if !(SCREENSHOT_INTERVAL_MIN_SECS..=SCREENSHOT_INTERVAL_MAX_SECS).contains(&secs) {
        return Err(ConfigError::OutOfRange {
            field: "screenshot_interval_secs",
            value: secs,
            min: SCREENSHOT_INTERVAL_MIN_SECS,
            max: SCREENSHOT_INTERVAL_MAX_SECS,
        });
    }
    Ok(Duration::from_secs(secs))
}

fn at_least(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max: u64::MAX,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub roots: Vec<GitRoot>,
    pub poll_interval_secs: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        let roots = home_dir()
            .map(|home| {
                ["Developer", "Projects", "code"]
                    .into_iter()
                    .map(|name| GitRoot {
                        path: home.join(name),
                        max_depth: DEFAULT_ROOT_DEPTH,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            roots,
            poll_interval_secs: 60,
        }
    }
}

impl GitSettings {
    /// Roots with a leading `~` resolved against the home directory.
    pub fn resolved_roots(&self) -> Vec<GitRoot> {
        self.roots
            .iter()
            .map(|root| GitRoot {
                path: expand_home(&root.path),
                max_depth: root.max_depth,
            })
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Passed through to the display layer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HudSettings {
    pub opacity: f64,
    pub always_on_top: bool,
}

impl Default for HudSettings {
    fn default() -> Self {
        Self {
            opacity: 0.85,
            always_on_top: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeySettings {
    pub toggle_pause: String,
    pub screenshot_now: String,
    pub open_folder: String,
    pub quit: String,
}

impl Default for HotkeySettings {
    fn default() -> Self {
        Self {
            toggle_pause: "cmd+shift+P".into(),
            screenshot_now: "cmd+shift+S".into(),
            open_folder: "cmd+shift+O".into(),
            quit: "cmd+shift+Q".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub screenshot_interval_secs: u64,
    pub inactivity_threshold_secs: u64,
    pub git: GitSettings,
    pub hud: HudSettings,
    pub hotkeys: HotkeySettings,
    pub screenshots_dir: Option<PathBuf>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            screenshot_interval_secs: 60,
            inactivity_threshold_secs: 300,
            git: GitSettings::default(),
            hud: HudSettings::default(),
            hotkeys: HotkeySettings::default(),
            screenshots_dir: None,
        }
    }
}

impl UserSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        screenshot_interval(self.screenshot_interval_secs)?;
        at_least(
            "inactivity_threshold_secs",
            self.inactivity_threshold_secs,
            INACTIVITY_THRESHOLD_MIN_SECS,
        )?;
        at_least(
            "git.poll_interval_secs",
            self.git.poll_interval_secs,
            GIT_POLL_INTERVAL_MIN_SECS,
        )?;
        if !(HUD_OPACITY_MIN..=HUD_OPACITY_MAX).contains(&self.hud.opacity) {
            return Err(ConfigError::InvalidRatio {
                field: "hud.opacity",
                value: self.hud.opacity,
                min: HUD_OPACITY_MIN,
                max: HUD_OPACITY_MAX,
            });
        }
        HotkeyRegistry::from_settings(&self.hotkeys)?;
        Ok(())
    }

    pub fn screenshot_interval(&self) -> Duration {
        Duration::from_secs(self.screenshot_interval_secs)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn screenshots_dir(&self, data_dir: &Path) -> PathBuf {
        self.screenshots_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| data_dir.join("screenshots"))
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(settings) => match settings.validate() {
                    Ok(()) => settings,
                    Err(err) => {
                        warn!("Ignoring invalid settings in {}: {err}", path.display());
                        UserSettings::default()
                    }
                },
                Err(err) => {
                    warn!("Ignoring unreadable settings in {}: {err}", path.display());
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> UserSettings {
        self.read().clone()
    }

    /// Apply `change` to a copy, validate it, then persist and publish it.
    pub fn update<F>(&self, change: F) -> Result<UserSettings>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        change(&mut next);
        next.validate()?;
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        data.validate()?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
