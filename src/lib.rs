pub mod activity;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod git;
pub mod hotkeys;
pub mod permissions;
pub mod platform;
pub mod screenshot;
pub mod settings;
mod utils;
pub mod watchers;

#[cfg(test)]
mod test_utils;

use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use directories::ProjectDirs;
use log::{error, info, warn};
use tokio::sync::mpsc;

use coordinator::{debug_mode_from_env, CoordinatorConfig, TrackingCoordinator};
use db::Database;
use git::GitCli;
use hotkeys::{dispatch, GlobalHotkeys, HotkeyAction, HotkeyOutcome, HotkeyRegistry};
use screenshot::ScreenshotStore;
use settings::SettingsStore;

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Devlapse starting up...");

    if let Err(err) = run_app() {
        error!("Devlapse failed: {err:#}");
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let dirs = ProjectDirs::from("com", "devlapse", "Devlapse")
        .context("could not resolve a home directory")?;
    let data_dir = dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let user_settings = settings.get();
    let database = Database::new(data_dir.join("devlapse.db"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("devlapse-worker")
        .build()
        .context("failed to build tokio runtime")?;

    // Close sessions left open by a crash.
    let recovered = runtime.block_on(database.close_dangling_sessions(Utc::now()))?;
    if recovered > 0 {
        warn!("Closed {recovered} session(s) left open by an earlier run");
    }

    let coordinator = {
        let _guard = runtime.enter();
        TrackingCoordinator::new(
            CoordinatorConfig::from_settings(&user_settings, debug_mode_from_env()),
            platform::native(),
            Arc::new(GitCli::new()),
            Arc::new(database),
            ScreenshotStore::new(user_settings.screenshots_dir(&data_dir)),
        )
    };

    // Hotkeys register on the main thread.
    let registry = HotkeyRegistry::from_settings(&user_settings.hotkeys)?;
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let hotkeys = match GlobalHotkeys::register(&registry, actions_tx) {
        Ok(hotkeys) => Some(hotkeys),
        Err(err) => {
            warn!("Global hotkeys unavailable: {err}");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = std_mpsc::channel();
    runtime.spawn(drive(coordinator.clone(), actions_rx, shutdown_tx.clone()));
    runtime.spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
            return;
        }
        info!("Interrupted; stopping");
        if let Err(err) = coordinator.stop().await {
            error!("Failed to stop tracking: {err:#}");
        }
        let _ = shutdown_tx.send(());
    });

    platform::run_main_loop(shutdown_rx);

    drop(hotkeys);
    runtime.shutdown_timeout(Duration::from_secs(2));
    info!("Devlapse stopped");
    Ok(())
}

/// Start tracking, then serve hotkey actions until quit.
async fn drive(
    coordinator: TrackingCoordinator,
    mut actions: mpsc::UnboundedReceiver<HotkeyAction>,
    shutdown: std_mpsc::Sender<()>,
) {
    match coordinator.start().await {
        Ok(snapshot) => {
            let missing = snapshot.permissions.missing();
            if !missing.is_empty() {
                warn!(
                    "Tracking started with {} permission(s) missing; affected components stay disabled",
                    missing.len()
                );
            }
        }
        Err(err) => error!("Failed to start tracking: {err:#}"),
    }

    while let Some(action) = actions.recv().await {
        if dispatch(action, &coordinator).await == HotkeyOutcome::Quit {
            break;
        }
    }
    let _ = shutdown.send(());
}
