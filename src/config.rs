// src/config.rs

//! Manages server configuration: loading, resolving paths, and validation.

use crate::core::keys::{ScopeKind, ShardScope};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Settings for the Prometheus endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, `/metrics` is served alongside the cache query routes.
    #[serde(default)]
    pub enabled: bool,
}

/// Settings for on-demand refreshes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OnDemandConfig {
    /// How long an `ON_DEMAND` entry lives if no sweep evicts it first.
    #[serde(default = "default_on_demand_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for OnDemandConfig {
    fn default() -> Self {
        Self {
            ttl: default_on_demand_ttl(),
        }
    }
}

/// Settings for the background purge of expired entries.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExpiryConfig {
    #[serde(default = "default_expiry_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: default_expiry_interval(),
        }
    }
}

/// One caching agent: an account and region, covering either its zones or the region itself.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentConfig {
    pub account: String,
    pub project: String,
    pub region: String,
    /// Zones covered by a zonal agent.
    #[serde(default)]
    pub zones: Vec<String>,
    pub scope: ScopeKind,
    #[serde(default = "default_agent_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// The JSON topology served by the fixture provider.
    pub fixture: PathBuf,
}

impl AgentConfig {
    pub fn shard_scope(&self) -> ShardScope {
        ShardScope::new(&self.account, &self.region, self.scope)
    }

    /// A stable identifier, unique per account, region and scope.
    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.account, self.region, self.scope)
    }
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    on_demand: OnDemandConfig,
    #[serde(default)]
    expiry: ExpiryConfig,
    #[serde(default)]
    agents: Vec<AgentConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7002
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_on_demand_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}
fn default_expiry_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_agent_interval() -> Duration {
    Duration::from_secs(60)
}

/// The final, validated server configuration.
#[derive(Serialize, Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub metrics: MetricsConfig,
    pub on_demand: OnDemandConfig,
    pub expiry: ExpiryConfig,
    pub agents: Vec<AgentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            metrics: MetricsConfig::default(),
            on_demand: OnDemandConfig::default(),
            expiry: ExpiryConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl Config {
    /// Loads, resolves and validates the configuration at `path`.
    ///
    /// Relative fixture paths are resolved against the directory of the config file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw_config: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let base_dir = Path::new(path).parent().unwrap_or_else(|| Path::new("."));
        let agents = raw_config
            .agents
            .into_iter()
            .map(|mut agent| {
                if agent.fixture.is_relative() {
                    agent.fixture = base_dir.join(&agent.fixture);
                }
                agent
            })
            .collect();

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            metrics: raw_config.metrics,
            on_demand: raw_config.on_demand,
            expiry: raw_config.expiry,
            agents,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.on_demand.ttl.is_zero() {
            return Err(anyhow!("on_demand.ttl cannot be 0"));
        }
        if self.expiry.interval.is_zero() {
            return Err(anyhow!("expiry.interval cannot be 0"));
        }

        let mut seen = HashSet::new();
        for (i, agent) in self.agents.iter().enumerate() {
            let id = agent.id();
            if agent.account.trim().is_empty() || agent.region.trim().is_empty() {
                return Err(anyhow!(
                    "invalid agent #{}: account and region are required",
                    i + 1
                ));
            }
            if !seen.insert(id.clone()) {
                return Err(anyhow!("duplicate agent '{id}'"));
            }
            if agent.interval.is_zero() {
                return Err(anyhow!("invalid agent '{id}': interval cannot be 0"));
            }
            match agent.scope {
                ScopeKind::Zonal if agent.zones.is_empty() => {
                    return Err(anyhow!("invalid agent '{id}': zonal agents need at least one zone"));
                }
                ScopeKind::Regional if !agent.zones.is_empty() => {
                    warn!("Agent '{}' is regional; its zones list is ignored.", id);
                }
                _ => {}
            }
        }

        if self.agents.is_empty() {
            warn!("No caching agents configured. The cache will stay empty.");
        }
        Ok(())
    }
}
