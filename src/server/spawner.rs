// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::http;
use crate::core::tasks::{caching_agent::CachingAgentTask, expiry::ExpiryTask};
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns all critical background tasks into the provided JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- HTTP Server ---
    let listener = ctx
        .listener
        .take()
        .ok_or_else(|| anyhow!("HTTP listener was already taken"))?;
    let http_state = state.clone();
    let shutdown_rx_http = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        http::serve(listener, http_state, shutdown_rx_http).await?;
        Ok(())
    });

    // --- Caching Agents ---
    for scheduled in &state.agents {
        let task = CachingAgentTask::new(state.clone(), scheduled.agent.clone(), scheduled.interval);
        let shutdown_rx_agent = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            task.run(shutdown_rx_agent).await;
            Ok(())
        });
    }

    // --- Maintenance ---
    let expiry = ExpiryTask::new(state.cache.clone(), state.config.expiry.interval);
    let shutdown_rx_expiry = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        expiry.run(shutdown_rx_expiry).await;
        Ok(())
    });

    info!(
        "Spawned {} background tasks ({} caching agents).",
        background_tasks.len(),
        state.agents.len()
    );
    Ok(())
}
