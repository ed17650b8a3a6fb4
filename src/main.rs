//! # UAV Monitor
//!
//! Polls the vehicle link, publishes telemetry snapshots with a link-quality
//! score, autosaves them, and turns fire detections into reports.
//!
//! Usage: `uav-monitor [CONFIG_PATH]`. Without a path, `UAV_MONITOR_CONFIG`
//! is consulted, then `config/default.toml`, then built-in defaults.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use uav_monitor::broadcast::{BroadcastEvent, ChannelBroadcaster};
use uav_monitor::config::{Config, CONFIG_ENV_VAR};
use uav_monitor::link::manager::LinkManager;
use uav_monitor::link::transport::SystemConnector;
use uav_monitor::logging;
use uav_monitor::pipeline::{Pipeline, PipelineSettings};
use uav_monitor::scheduler::{ScheduleSettings, Scheduler};
use uav_monitor::store::open_store;

/// Main entry point for the UAV monitor
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate configuration
///    - Set up logging
///    - Build the link manager, document store and broadcast channel
///
/// 2. **Main Loop**
///    - Fast poll, autosave and event sync run as independent tasks
///    - Wait for Ctrl+C
///
/// 3. **Graceful Shutdown**
///    - Raise the shutdown flag and wait for every loop to exit
///    - Close the vehicle link
///
/// # Errors
///
/// Returns error if configuration, logging or the store cannot be set up.
/// An unreachable vehicle is not an error; telemetry falls back to the
/// store until a link comes up.
#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_path) = Config::resolve(std::env::args().nth(1), std::env::var(CONFIG_ENV_VAR).ok())
        .context("Failed to load configuration")?;

    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    info!("UAV Monitor v{} starting...", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No configuration file found, using built-in defaults"),
    }

    let connector = SystemConnector::new(Duration::from_millis(config.link.connect_timeout_ms));
    let link = Arc::new(LinkManager::new(
        config.link.endpoints.clone(),
        config.link.settings(),
        Arc::new(connector),
    ));
    for endpoint in link.candidates() {
        info!("Link candidate: {}", endpoint);
    }

    let store = open_store(&config.store)
        .await
        .with_context(|| format!("Failed to open '{}' store", config.store.backend))?;

    let broadcaster = ChannelBroadcaster::new(config.broadcast.channel_capacity);
    let events = broadcaster.subscribe();

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&link),
        store,
        Arc::new(broadcaster),
        PipelineSettings::from_config(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let event_log = tokio::spawn(log_events(events, shutdown_rx.clone()));

    let scheduler = Scheduler::new(pipeline, ScheduleSettings::from_config(&config)).spawn(shutdown_rx);

    info!("Press Ctrl+C to exit");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Received Ctrl+C, shutting down...");
    // Receivers only fail to see this if they are already gone
    let _ = shutdown_tx.send(true);

    scheduler.join().await;
    if let Err(e) = event_log.await {
        warn!("Event logger ended abnormally: {}", e);
    }
    link.release().await;

    info!("Shutdown complete");
    Ok(())
}

/// Log every broadcast event at debug level until shutdown
async fn log_events(mut events: broadcast::Receiver<BroadcastEvent>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Ok(event) => debug!(topic = %event.topic, "{}", event.payload),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Event logger lagged, {} events skipped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
