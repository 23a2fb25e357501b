//! arya-client: Background client for the Arya audio processing service
//!
//! This daemon provides:
//! - Mode selection (Voice / Music / Cleaner) over one shared job slot
//! - File submission with synthetic progress and a hard request timeout
//! - Per-track playback on a single shared audio output
//! - Track and bundle downloads
//! - IPC server for UI communication, with pushed state events

mod api;
mod config;
mod engine;
mod events;
mod ipc;
mod lifecycle;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::config::Config;
use crate::engine::AudioEngine;
use crate::events::StateEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::{JobSettings, StateMachine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "arya-client starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        api = %config.api_base_url,
        ?config.socket_path,
        ?config.download_dir,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    // Create channels for inter-component communication
    // IPC server -> State machine
    let (command_tx, command_rx) = mpsc::channel(32);
    // Audio engine -> State machine
    let (engine_tx, engine_rx) = mpsc::channel(64);
    // State machine -> subscribed IPC clients
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(256);

    // Start the audio engine (runs on dedicated thread)
    let engine = AudioEngine::start(engine_tx)?;
    if !engine.is_available() {
        warn!("audio engine unavailable, playback requests will fail");
    }

    let api = ApiClient::new(config.api_base_url.clone())?;

    // Create the state machine
    let mut state_machine = StateMachine::new(
        api.clone(),
        Arc::new(api),
        Box::new(engine.clone()),
        JobSettings::from(&config),
        event_tx.clone(),
    );

    // Create IPC server
    let server = Server::new(&config.socket_path, command_tx, event_tx)?;

    info!("client initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the state machine (processes commands and background results)
        _ = state_machine.run(command_rx, engine_rx) => {
            info!("state machine exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    engine.shutdown();
    server.shutdown().await;

    info!("arya-client stopped");

    Ok(())
}
