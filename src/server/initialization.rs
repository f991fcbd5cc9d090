// src/server/initialization.rs

//! Handles the complete server initialization process, from state setup to
//! binding the HTTP listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::clock::{SharedClock, SystemClock};
use crate::core::state::{EngineState, LogReloadHandle};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config, log_reload_handle: Arc<LogReloadHandle>) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let clock: SharedClock = Arc::new(SystemClock);
    let state = EngineState::initialize(config, clock, Some(log_reload_handle))
        .await
        .context("Failed to initialize engine state")?;
    info!("Engine state initialized with {} caching agents.", state.agents.len());

    let listener = TcpListener::bind((state.config.host.as_str(), state.config.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                state.config.host, state.config.port
            )
        })?;
    info!(
        "topocache listening on http://{}:{}",
        state.config.host, state.config.port
    );

    Ok(ServerContext {
        state,
        listener: Some(listener),
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    info!("Starting topocache version {}", env!("CARGO_PKG_VERSION"));
    for agent in &config.agents {
        info!(
            "Agent '{}': project {}, zones [{}], every {:?}.",
            agent.id(),
            agent.project,
            agent.zones.join(", "),
            agent.interval
        );
    }
    info!(
        "On-demand entries expire after {:?}; expired entries are purged every {:?}.",
        config.on_demand.ttl, config.expiry.interval
    );
}
