//! # Dungeon Master
//!
//! Entry point for the monster controller.
//!
//! ## Startup
//!
//! 1. **Configuration** - `DUNGEON_CONFIG` names a TOML or JSON file; `DUNGEON_*`
//!    variables override single fields on top of it or of the defaults
//! 2. **Store** - in-memory state store wrapped with operation tracing
//! 3. **Notification sink** - HTTP client for the portal's deletion endpoint
//! 4. **Controller** - watches, initial resync and the worker pool
//!
//! ## Shutdown
//!
//! Ctrl+C flips the shutdown channel. Workers stop taking new keys and the
//! process exits once every in-flight pass has finished.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dungeon_reconciler::{Controller, ControllerConfig, HttpNotificationSink};
use dungeon_store::{InMemoryStore, TracingStore};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    init_tracing();

    info!("Dungeon Master starting...");

    let config = load_config().context("Failed to load controller configuration")?;
    config
        .validate()
        .context("Controller configuration is invalid")?;

    let sink = HttpNotificationSink::new(&config.notification)
        .context("Failed to build the portal notification client")?;
    info!(
        endpoint = %sink.endpoint(),
        policy = ?config.notification.policy,
        "Notification sink ready"
    );

    let store = Arc::new(TracingStore::new(InMemoryStore::new()));
    let controller = Controller::new(store, Arc::new(sink), &config)
        .context("Failed to build the controller")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(controller.run(shutdown_rx));

    info!(
        workers = config.workers,
        "Dungeon Master started in {:?}",
        start_time.elapsed()
    );

    wait_for_shutdown().await;
    // Receivers outlive the send only if the controller is still running.
    let _ = shutdown_tx.send(true);

    running
        .await
        .context("Controller task panicked")?
        .context("Controller stopped with an error")?;

    info!("Dungeon Master stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config() -> Result<ControllerConfig> {
    let Ok(path) = std::env::var("DUNGEON_CONFIG") else {
        return Ok(ControllerConfig::from_env());
    };
    let mut config = ControllerConfig::from_file(Path::new(&path))
        .with_context(|| format!("Failed to read config file {path}"))?;
    config.apply_env();
    info!(%path, "Configuration loaded");
    Ok(config)
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
