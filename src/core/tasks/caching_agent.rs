// src/core/tasks/caching_agent.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::CacheError;
use crate::core::agent::ServerGroupCachingAgent;
use crate::core::metrics::{SWEEPS_TOTAL, SWEEP_DURATION_SECONDS};
use crate::core::state::EngineState;

/// A task that periodically sweeps one caching agent's shard into the provider cache.
pub struct CachingAgentTask {
    state: Arc<EngineState>,
    agent: Arc<ServerGroupCachingAgent>,
    interval: Duration,
}

impl CachingAgentTask {
    pub fn new(
        state: Arc<EngineState>,
        agent: Arc<ServerGroupCachingAgent>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            agent,
            interval,
        }
    }

    /// The main run loop for the caching agent task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Caching agent {} started.", self.agent.agent_type());
        let mut interval = tokio::time::interval(self.interval);
        // A slow sweep must not trigger a burst of catch-up sweeps.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = run_sweep(&self.state, &self.agent).await {
                        warn!("Sweep for {} failed: {}", self.agent.agent_type(), e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Caching agent {} shutting down.", self.agent.agent_type());
                    return;
                }
            }
        }
    }
}

/// Runs a single sweep for `agent` and applies its result.
///
/// On failure nothing is written and the agent's status records the error.
pub async fn run_sweep(
    state: &EngineState,
    agent: &ServerGroupCachingAgent,
) -> Result<(), CacheError> {
    let agent_type = agent.agent_type();
    let timer = SWEEP_DURATION_SECONDS.start_timer();

    match agent.load_data(&state.cache).await {
        Ok(result) => {
            state
                .cache
                .put_cache_result(&agent_type, agent.authoritative_types(), result);
            timer.observe_duration();
            SWEEPS_TOTAL.with_label_values(&["success"]).inc();
            state.agent_stats.record_success(&agent_type, state.now_millis());
            debug!("Sweep for {} applied.", agent_type);
            Ok(())
        }
        Err(e) => {
            timer.stop_and_discard();
            SWEEPS_TOTAL.with_label_values(&["failure"]).inc();
            state
                .agent_stats
                .record_failure(&agent_type, state.now_millis(), &e.to_string());
            Err(e)
        }
    }
}
