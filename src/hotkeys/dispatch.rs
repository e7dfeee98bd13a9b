use log::{error, info};

use super::HotkeyAction;
use crate::coordinator::TrackingCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyOutcome {
    Continue,
    Quit,
}

/// Run one hotkey action against the coordinator. Failures are logged and
/// never end the listener loop; only `Quit` does.
pub async fn dispatch(action: HotkeyAction, coordinator: &TrackingCoordinator) -> HotkeyOutcome {
    match action {
        HotkeyAction::TogglePause => match coordinator.toggle_pause().await {
            Ok(status) => info!("Hotkey: tracking is now {status:?}"),
            Err(err) => error!("Hotkey {action} failed: {err:#}"),
        },
        HotkeyAction::ScreenshotNow => {
            if let Err(err) = coordinator.take_screenshot_now().await {
                error!("Hotkey {action} failed: {err:#}");
            }
        }
        HotkeyAction::OpenFolder => {
            if let Err(err) = coordinator.open_screenshots_folder() {
                error!("Hotkey {action} failed: {err:#}");
            }
        }
        HotkeyAction::Quit => {
            if let Err(err) = coordinator.stop().await {
                error!("Failed to stop tracking on quit: {err:#}");
            }
            return HotkeyOutcome::Quit;
        }
    }
    HotkeyOutcome::Continue
}
