// src/core/state/stats.rs

//! Contains the per-agent sweep bookkeeping exposed by the status route.

use dashmap::DashMap;
use serde::Serialize;

/// The outcome history of one caching agent's sweeps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub sweeps: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Holds the sweep status of every agent, keyed by agent type.
#[derive(Debug, Default)]
pub struct AgentStats {
    statuses: DashMap<String, AgentStatus>,
}

impl AgentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, agent_type: &str, now: i64) {
        let mut status = self.statuses.entry(agent_type.to_string()).or_default();
        status.sweeps += 1;
        status.consecutive_failures = 0;
        status.last_success = Some(now);
    }

    pub fn record_failure(&self, agent_type: &str, now: i64, error: &str) {
        let mut status = self.statuses.entry(agent_type.to_string()).or_default();
        status.sweeps += 1;
        status.failures += 1;
        status.consecutive_failures += 1;
        status.last_failure = Some(now);
        status.last_error = Some(error.to_string());
    }

    pub fn get(&self, agent_type: &str) -> Option<AgentStatus> {
        self.statuses.get(agent_type).map(|s| s.clone())
    }

    /// A snapshot of every agent's status, sorted by agent type.
    pub fn snapshot(&self) -> Vec<(String, AgentStatus)> {
        let mut all: Vec<_> = self
            .statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
