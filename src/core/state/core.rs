// src/core/state/core.rs

//! Defines the central `EngineState` struct, holding all shared engine-wide state.

use super::stats::AgentStats;
use crate::config::{AgentConfig, Config};
use crate::core::CacheError;
use crate::core::agent::ServerGroupCachingAgent;
use crate::core::agent::fixture::FixtureComputeProvider;
use crate::core::agent::provider::{ComputeProvider, Location};
use crate::core::clock::SharedClock;
use crate::core::keys::ScopeKind;
use crate::core::on_demand_updater::OnDemandCacheUpdater;
use crate::core::storage::ProviderCache;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

pub type LogReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// A configured agent together with the schedule it sweeps on.
#[derive(Debug, Clone)]
pub struct ScheduledAgent {
    pub agent: Arc<ServerGroupCachingAgent>,
    pub interval: std::time::Duration,
}

/// The central struct holding all shared, engine-wide state.
/// It is wrapped in an `Arc` and handed to every background task and HTTP handler.
#[derive(Debug)]
pub struct EngineState {
    pub config: Config,
    /// The provider cache. The only shared mutable data in the engine.
    pub cache: Arc<ProviderCache>,
    pub agents: Vec<ScheduledAgent>,
    /// Dispatches on-demand requests to `agents`.
    pub updater: OnDemandCacheUpdater,
    pub agent_stats: AgentStats,
    /// A handle to the logging filter, allowing the log level to change at runtime.
    pub log_reload_handle: Option<Arc<LogReloadHandle>>,
}

impl EngineState {
    /// Builds the engine from configuration, loading each agent's fixture topology.
    pub async fn initialize(
        config: Config,
        clock: SharedClock,
        log_reload_handle: Option<Arc<LogReloadHandle>>,
    ) -> Result<Arc<Self>, CacheError> {
        let mut agents = Vec::with_capacity(config.agents.len());
        for agent_config in &config.agents {
            let location = location_for(agent_config);
            let provider =
                FixtureComputeProvider::from_file(location, &agent_config.fixture).await?;
            info!(
                "Loaded fixture topology for agent '{}' from {}.",
                agent_config.id(),
                agent_config.fixture.display()
            );
            agents.push((agent_config.clone(), Arc::new(provider) as Arc<dyn ComputeProvider>));
        }
        Ok(Self::with_providers(config, clock, agents, log_reload_handle))
    }

    /// Builds the engine around already constructed providers.
    pub fn with_providers(
        config: Config,
        clock: SharedClock,
        providers: Vec<(AgentConfig, Arc<dyn ComputeProvider>)>,
        log_reload_handle: Option<Arc<LogReloadHandle>>,
    ) -> Arc<Self> {
        let cache = Arc::new(ProviderCache::new(clock.clone()));
        let agents: Vec<ScheduledAgent> = providers
            .into_iter()
            .map(|(agent_config, provider)| ScheduledAgent {
                agent: Arc::new(ServerGroupCachingAgent::new(
                    agent_config.shard_scope(),
                    agent_config.project.as_str(),
                    provider,
                    clock.clone(),
                    config.on_demand.ttl,
                )),
                interval: agent_config.interval,
            })
            .collect();
        let updater = OnDemandCacheUpdater::new(
            cache.clone(),
            agents.iter().map(|a| a.agent.clone()).collect(),
        );

        Arc::new(Self {
            config,
            cache,
            agents,
            updater,
            agent_stats: AgentStats::new(),
            log_reload_handle,
        })
    }

    pub fn now_millis(&self) -> i64 {
        self.cache.clock().now_millis()
    }

    /// Replaces the active log filter.
    pub fn set_log_level(&self, directives: &str) -> Result<(), CacheError> {
        let handle = self
            .log_reload_handle
            .as_ref()
            .ok_or_else(|| CacheError::InvalidRequest("log reloading is not enabled".into()))?;
        let filter = EnvFilter::try_new(directives)
            .map_err(|e| CacheError::InvalidRequest(format!("invalid log filter: {e}")))?;
        handle
            .reload(filter)
            .map_err(|e| CacheError::Internal(format!("failed to reload log filter: {e}")))?;
        info!("Log level changed to '{}'.", directives);
        Ok(())
    }
}

fn location_for(agent: &AgentConfig) -> Location {
    match agent.scope {
        ScopeKind::Zonal => Location::zonal(agent.region.as_str(), agent.zones.clone()),
        ScopeKind::Regional => Location::regional(agent.region.as_str()),
    }
}
