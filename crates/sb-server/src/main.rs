//! scriptbus server
//!
//! Composition root: loads configuration, opens the state store, connects
//! the bus client, loads the library and every automation from disk, starts
//! the file watcher, and serves the HTTP API until interrupted. No engine
//! logic lives here, only wiring.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sb_api::AppState;
use sb_bus::BusClient;
use sb_config::Config;
use sb_core::{LogBuffer, MessageBuffer};
use sb_library::LibraryManager;
use sb_runtime::{AutomationRuntime, ScriptWatcher};
use sb_state::StateStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("starting scriptbus");

    // Shared buffers and stores.
    let logs = Arc::new(LogBuffer::new(config.log_capacity));
    let messages = Arc::new(MessageBuffer::new(config.message_capacity));
    let state = Arc::new(
        StateStore::open(&config.state_path)
            .with_context(|| format!("opening state store {}", config.state_path.display()))?,
    );

    // Bus client with automatic reconnect and resubscription.
    let bus = BusClient::connect(&config.mqtt, Arc::clone(&messages));

    // One shared restricted engine with the Context API registered.
    let engine = Arc::new(sb_runtime::runtime_engine());

    // Library first, so automations can call into it from the start.
    let library = Arc::new(LibraryManager::new(Arc::clone(&engine)));
    let library_dir = config.library_dir();
    match library.load_all(&library_dir) {
        Ok(count) => info!(modules = count, "library loaded"),
        Err(err) => warn!(%err, "library failed to load; starting with no modules"),
    }

    let runtime = Arc::new(AutomationRuntime::new(
        Arc::clone(&engine),
        Arc::clone(&bus),
        Arc::clone(&state),
        Arc::clone(&library),
        Arc::clone(&logs),
        &config.scripts_dir,
    ));
    let (loaded, errors) = runtime.load_dir().await;
    info!(loaded, failed = errors.len(), "automations loaded");

    let _watcher = ScriptWatcher::spawn(
        Arc::clone(&runtime),
        Arc::clone(&library),
        library_dir,
    )
    .context("starting file watcher")?;

    // HTTP API.
    let app = sb_api::router(AppState {
        runtime,
        bus,
        state,
        library,
        logs,
        messages,
    });
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("binding {}", config.http_bind))?;
    info!(addr = %config.http_bind, "http api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for shutdown signal");
    }
}
