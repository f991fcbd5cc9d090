// src/core/agent/sweep.rs

//! The scheduled refresh of an agent's shard.
//!
//! A sweep rebuilds the shard from live provider state and then reconciles it
//! with the `ON_DEMAND` entries the shard owns. An on-demand refresh that
//! started at or after the sweep's start time (`T0`) saw fresher state than
//! the sweep did, so its payload is laid over the live result. Older entries
//! survive exactly one sweep after they were first seen, which gives readers
//! time to observe them before they are evicted.

use super::ServerGroupCachingAgent;
use super::builder::CacheResultBuilder;
use super::server_group::{ServerGroup, ServerGroupAssembler};
use crate::core::errors::CacheError;
use crate::core::keys::Namespace;
use crate::core::metrics::{ON_DEMAND_EVICTIONS_TOTAL, ON_DEMAND_OVERLAYS_TOTAL};
use crate::core::storage::{
    CacheData, CacheResult, CacheResultMap, ProviderCache, merge_relationships,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a sweep decided to do with one owned `ON_DEMAND` entry.
#[derive(Debug)]
enum OnDemandDisposition {
    /// Fresher than the sweep: copy its payload over the live result.
    Overlay(CacheResultMap),
    /// Keep the entry with a bumped `processedCount`.
    Keep { processed_count: i64 },
    Evict,
}

#[derive(Debug, Default)]
struct ReconcileStats {
    overlaid: usize,
    kept: usize,
    evicted: usize,
}

impl ServerGroupCachingAgent {
    /// Runs one sweep and returns the result to apply to the store.
    ///
    /// A provider failure aborts the sweep before any `ON_DEMAND` entry is
    /// examined, so a failed sweep leaves the cache exactly as it was.
    pub async fn load_data(&self, cache: &ProviderCache) -> Result<CacheResult, CacheError> {
        let t0 = self.clock.now_millis();
        debug!("Agent {} starting sweep at {}.", self.agent_type(), t0);

        let server_groups = self.fetch_server_groups(cache).await?;

        let mut builder = CacheResultBuilder::new(t0);
        for server_group in &server_groups {
            self.cache_server_group(&mut builder, server_group)?;
        }
        let stats = self.reconcile_on_demand(cache, &mut builder);

        let mut result = builder.build();
        result
            .introspection
            .insert("agentType".into(), json!(self.agent_type()));
        result.introspection.insert("startTime".into(), json!(t0));
        result
            .introspection
            .insert("serverGroups".into(), json!(server_groups.len()));

        info!(
            "Agent {} swept {} server groups ({} on-demand overlaid, {} kept, {} evicted).",
            self.agent_type(),
            server_groups.len(),
            stats.overlaid,
            stats.kept,
            stats.evicted
        );
        Ok(result)
    }

    async fn fetch_server_groups(
        &self,
        cache: &ProviderCache,
    ) -> Result<Vec<ServerGroup>, CacheError> {
        let provider = &self.provider;
        let (managers, instances, templates, autoscalers) = futures::try_join!(
            provider.instance_group_managers(),
            provider.instances(),
            provider.instance_templates(),
            provider.autoscalers(),
        )?;

        let assembler = ServerGroupAssembler {
            account: self.account(),
            project: &self.project,
            cache,
        };
        Ok(assembler.assemble(&managers, &instances, &templates, &autoscalers))
    }

    fn reconcile_on_demand(
        &self,
        cache: &ProviderCache,
        builder: &mut CacheResultBuilder,
    ) -> ReconcileStats {
        let t0 = builder.start_time();
        let owned: Vec<String> = cache
            .identifiers(Namespace::OnDemand)
            .into_iter()
            .filter(|key| self.scope.owns_encoded(key))
            .collect();

        let mut stats = ReconcileStats::default();
        for entry in cache.get_all(Namespace::OnDemand, &owned) {
            let disposition = classify(&entry, t0);
            if !matches!(disposition, OnDemandDisposition::Overlay(_)) {
                // A handler may rewrite the entry before this result is applied.
                builder.guard_on_demand(&entry.id, entry.attribute_i64("cacheTime"));
            }
            match disposition {
                OnDemandDisposition::Overlay(payload) => {
                    overlay(builder, payload);
                    stats.overlaid += 1;
                    debug!("Agent {} overlaid on-demand data for {}.", self.agent_type(), entry.id);
                }
                OnDemandDisposition::Keep { processed_count } => {
                    let now = self.clock.now_millis();
                    let kept = builder.on_demand().keep(&entry.id);
                    kept.attributes = entry.attributes.clone();
                    kept.attributes
                        .insert("processedCount".into(), json!(processed_count));
                    kept.attributes.insert("processedTime".into(), json!(now));
                    kept.relationships = entry.relationships.clone();
                    kept.ttl_seconds = entry.ttl_seconds;
                    stats.kept += 1;
                }
                OnDemandDisposition::Evict => {
                    builder.on_demand().evict(&entry.id);
                    stats.evicted += 1;
                }
            }
        }

        ON_DEMAND_OVERLAYS_TOTAL.inc_by(stats.overlaid as f64);
        ON_DEMAND_EVICTIONS_TOTAL.inc_by(stats.evicted as f64);
        stats
    }
}

fn classify(entry: &Arc<CacheData>, t0: i64) -> OnDemandDisposition {
    let cache_time = entry.attribute_i64("cacheTime").unwrap_or(0);
    let processed_count = entry.attribute_i64("processedCount").unwrap_or(0);

    if cache_time >= t0 {
        match parse_payload(entry) {
            Some(payload) => OnDemandDisposition::Overlay(payload),
            None => OnDemandDisposition::Keep {
                processed_count: processed_count + 1,
            },
        }
    } else if processed_count > 0 {
        OnDemandDisposition::Evict
    } else {
        OnDemandDisposition::Keep { processed_count: 1 }
    }
}

/// Returns the entry's payload if it has a non-empty one. A corrupt payload
/// is logged and treated as absent.
fn parse_payload(entry: &CacheData) -> Option<CacheResultMap> {
    let raw = match entry.attributes.get("cacheResults") {
        Some(Value::String(raw)) => raw,
        _ => return None,
    };
    match CacheResult::from_payload(raw) {
        Ok(payload) if !payload.is_empty() => Some(payload),
        Ok(_) => None,
        Err(e) => {
            warn!(
                "Ignoring corrupt on-demand payload for {}: {}",
                entry.id, e
            );
            None
        }
    }
}

/// Lays an on-demand payload over the live result.
///
/// Legacy behaviour, kept deliberately until upstream settles it: server
/// group relationships are replaced by the payload's, while every other
/// namespace unions the payload's relationships with the live ones.
fn overlay(builder: &mut CacheResultBuilder, payload: CacheResultMap) {
    for (namespace, entries) in payload {
        if namespace == Namespace::OnDemand {
            continue;
        }
        for data in entries {
            let kept = builder.namespace(namespace).keep(&data.id);
            kept.attributes = data.attributes;
            // LEGACY: the replace/merge asymmetry below is intentional and must
            // not be "fixed" until upstream clarifies which behaviour is correct.
            if namespace == Namespace::ServerGroups {
                kept.relationships = data.relationships;
            } else {
                merge_relationships(&mut kept.relationships, &data.relationships);
            }
        }
    }
}
