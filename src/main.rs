use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use twowatch::db::{Database, Direction};
use twowatch::device::load_or_create_device_id;
use twowatch::settings::SettingsStore;
use twowatch::sync::{DirRemote, SyncController, SyncEngine};
use twowatch::timer::{
    EventBus, RunState, SharedState, StopwatchEvent, StopwatchState, TimingController,
};
use twowatch::ConsolidationConfig;

fn data_dir() -> PathBuf {
    std::env::var_os("TWOWATCH_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".twowatch"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let device_id = load_or_create_device_id(&data_dir.join("device_id"))?;
    info!("twowatch starting up as device {device_id}");

    let database = Database::new(data_dir.join("twowatch.sqlite3"))?;

    let remote_dir = std::env::var_os("TWOWATCH_REMOTE_DIR")
        .map(PathBuf::from)
        .or_else(|| settings.sync().remote_dir)
        .unwrap_or_else(|| data_dir.join("shared"));
    let remote = Arc::new(DirRemote::new(remote_dir));

    let state: SharedState = Arc::new(tokio::sync::Mutex::new(StopwatchState::new()));
    let events = EventBus::default();
    let consolidation = ConsolidationConfig::with_retention_days(settings.retention_days());

    let engine = Arc::new(SyncEngine::new(
        database.clone(),
        remote,
        device_id.clone(),
        state.clone(),
        events.clone(),
        consolidation.clone(),
    ));

    let controller = TimingController::init(
        database,
        engine.clone(),
        state,
        events.clone(),
        device_id,
        consolidation,
    )
    .await?;

    if controller.resume_persisted_session().await? {
        info!("Resumed session left running by the previous launch");
    }
    engine.bootstrap().await?;

    let mut sync_controller = SyncController::new();
    sync_controller.start(engine, settings.sync_interval())?;

    // Surface cross-device activity on the console.
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                StopwatchEvent::BaseTimeUpdated(total) => {
                    println!("total is now {total:.2}h");
                }
                StopwatchEvent::RemoteSessionStarted {
                    device, direction, ..
                } => {
                    println!("{device} started timing {direction:?}");
                }
                StopwatchEvent::RemoteSessionStopped { device } => {
                    println!("{device} stopped timing");
                }
            }
        }
    });

    println!("commands: forward, backward, pause, discard, total, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "forward" => controller.start_session(Direction::Forward).await?,
            "backward" => controller.start_session(Direction::Backward).await?,
            "pause" => match controller.run_state().await {
                RunState::RunningRemote => controller.pause_remote_session().await?,
                _ => controller.pause_session().await?,
            },
            "discard" => controller.discard_running_session().await?,
            "total" => {
                println!("{:.2}h", controller.current_total_hours().await);
            }
            "quit" | "exit" => break,
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    if let Err(err) = controller.pause_session().await {
        warn!("Failed to pause before shutdown: {err:#}");
    }
    sync_controller.stop().await?;

    Ok(())
}
