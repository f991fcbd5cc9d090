// src/core/on_demand_updater.rs

//! Fans an on-demand request out to every caching agent and applies what they return.

use crate::core::agent::{OnDemandRequest, OnDemandResult, ServerGroupCachingAgent};
use crate::core::errors::CacheError;
use crate::core::metrics::ON_DEMAND_REQUESTS_TOTAL;
use crate::core::storage::ProviderCache;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// A summary of one applied on-demand result.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOnDemand {
    pub source_agent_type: String,
    pub upserted: usize,
    pub evicted: usize,
}

#[derive(Debug)]
pub struct OnDemandCacheUpdater {
    cache: Arc<ProviderCache>,
    agents: Vec<Arc<ServerGroupCachingAgent>>,
}

impl OnDemandCacheUpdater {
    pub fn new(cache: Arc<ProviderCache>, agents: Vec<Arc<ServerGroupCachingAgent>>) -> Self {
        Self { cache, agents }
    }

    pub fn agents(&self) -> &[Arc<ServerGroupCachingAgent>] {
        &self.agents
    }

    /// Runs `request` through every agent that handles it.
    ///
    /// Returns an empty list if no agent handled it.
    ///
    /// Partial application: when some agents fail, the results of the agents
    /// that succeeded are still written to the cache, and the first failure is
    /// returned afterwards. An `Err` therefore does not mean the cache is
    /// unchanged.
    pub async fn handle(
        &self,
        request: &OnDemandRequest,
    ) -> Result<Vec<AppliedOnDemand>, CacheError> {
        let handlers: Vec<_> = self
            .agents
            .iter()
            .filter(|agent| agent.handles(request))
            .collect();
        if handlers.is_empty() {
            debug!("No caching agent handles on-demand request {:?}.", request);
            ON_DEMAND_REQUESTS_TOTAL
                .with_label_values(&["unhandled"])
                .inc();
            return Ok(Vec::new());
        }

        let outcomes = join_all(
            handlers
                .iter()
                .map(|agent| agent.handle(&self.cache, request)),
        )
        .await;

        let mut applied = Vec::new();
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Some(result)) => applied.push(self.apply(result)),
                Ok(None) => {}
                Err(e) => {
                    warn!("On-demand request {:?} failed: {}", request, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                ON_DEMAND_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
                Err(e)
            }
            None => {
                ON_DEMAND_REQUESTS_TOTAL
                    .with_label_values(&["handled"])
                    .inc();
                Ok(applied)
            }
        }
    }

    fn apply(&self, result: OnDemandResult) -> AppliedOnDemand {
        let OnDemandResult {
            source_agent_type,
            cache_result,
            evictions,
            authoritative_types,
        } = result;

        let upserted = cache_result.cache_results.values().map(Vec::len).sum();
        self.cache
            .put_cache_result(&source_agent_type, &authoritative_types, cache_result);

        let mut evicted = 0;
        for (namespace, keys) in evictions {
            evicted += self.cache.evict(namespace, &keys);
        }

        AppliedOnDemand {
            source_agent_type,
            upserted,
            evicted,
        }
    }
}
