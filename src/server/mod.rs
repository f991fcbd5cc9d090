// src/server/mod.rs

use crate::config::Config;
use crate::core::state::LogReloadHandle;
use anyhow::Result;
use std::sync::Arc;

mod context;
pub mod http;
mod initialization;
mod main_loop;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config, log_reload_handle: Arc<LogReloadHandle>) -> Result<()> {
    // 1. Initialize engine state, agents and the HTTP listener.
    let mut server_context = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context)?;

    // 3. Wait for a shutdown signal or a failed task.
    main_loop::run(server_context).await;

    Ok(())
}
