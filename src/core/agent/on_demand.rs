// src/core/agent/on_demand.rs

//! Out-of-band refresh of a single server group.

use super::ServerGroupCachingAgent;
use super::builder::CacheResultBuilder;
use super::model::local_name;
use super::naming::Moniker;
use super::server_group::ServerGroupAssembler;
use crate::core::errors::CacheError;
use crate::core::keys::{Namespace, PROVIDER, ResourceKey, ScopeKind, server_group_pattern};
use crate::core::metrics::ON_DEMAND_EVICTIONS_TOTAL;
use crate::core::storage::{CacheData, CacheResult, ProviderCache};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

/// The kinds of resource an on-demand request can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnDemandKind {
    ServerGroup,
    LoadBalancer,
    SecurityGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandRequest {
    pub kind: OnDemandKind,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub account: String,
    pub region: String,
    /// The server group name.
    #[serde(default, alias = "serverGroupName")]
    pub name: Option<String>,
}

fn default_provider() -> String {
    PROVIDER.to_string()
}

impl OnDemandRequest {
    pub fn server_group(
        account: impl Into<String>,
        region: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: OnDemandKind::ServerGroup,
            provider: default_provider(),
            account: account.into(),
            region: region.into(),
            name: Some(name.into()),
        }
    }
}

/// What an agent produced for an on-demand request, for the caller to apply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandResult {
    pub source_agent_type: String,
    pub cache_result: CacheResult,
    pub evictions: IndexMap<Namespace, Vec<String>>,
    pub authoritative_types: Vec<Namespace>,
}

/// An owned `ON_DEMAND` entry as reported to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOnDemandRequest {
    pub id: String,
    pub details: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moniker: Option<Value>,
    pub cache_time: Option<i64>,
    pub processed_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_time: Option<i64>,
}

impl ServerGroupCachingAgent {
    /// Whether this agent is responsible for `request`.
    pub fn handles(&self, request: &OnDemandRequest) -> bool {
        request.kind == OnDemandKind::ServerGroup
            && request.provider == PROVIDER
            && request.account == self.scope.account
            && request.region == self.scope.region
            && request.name.as_deref().is_some_and(|name| !name.is_empty())
    }

    /// Refreshes a single server group out of band.
    ///
    /// Returns `Ok(None)` when the request is not for this agent. The only
    /// store write is the `ON_DEMAND` entry (or its eviction); the returned
    /// result is applied by the caller.
    pub async fn handle(
        &self,
        cache: &ProviderCache,
        request: &OnDemandRequest,
    ) -> Result<Option<OnDemandResult>, CacheError> {
        if !self.handles(request) {
            return Ok(None);
        }
        let Some(name) = request.name.as_deref() else {
            return Ok(None);
        };

        let t0 = self.clock.now_millis();
        let Some(manager) = self.provider.instance_group_manager(name).await? else {
            return Ok(Some(self.evict_missing(cache, name)));
        };

        let provider = &self.provider;
        let (instances, autoscaler, template) = futures::try_join!(
            provider.relevant_instances(&manager),
            provider.autoscaler(&manager),
            async {
                match manager.instance_template.as_deref() {
                    Some(url) => provider.instance_template(local_name(url)).await,
                    None => Ok(None),
                }
            },
        )?;

        let assembler = ServerGroupAssembler {
            account: self.account(),
            project: &self.project,
            cache,
        };
        let server_groups = assembler.assemble(
            std::slice::from_ref(&manager),
            &instances,
            template.as_slice(),
            autoscaler.as_slice(),
        );
        let server_group = server_groups.first().ok_or_else(|| {
            CacheError::Internal(format!("server group '{name}' was not assembled"))
        })?;

        let mut builder = CacheResultBuilder::new(t0);
        self.cache_server_group(&mut builder, server_group)?;
        let cache_result = builder.build();

        let moniker = Moniker::derive(&server_group.name);
        let key = self.server_group_key(server_group, &moniker).encode();
        let mut attributes = Map::new();
        attributes.insert("cacheTime".into(), json!(t0));
        attributes.insert("cacheResults".into(), json!(cache_result.to_payload()?));
        attributes.insert("processedCount".into(), json!(0));
        attributes.insert("moniker".into(), serde_json::to_value(&moniker)?);
        cache.put(
            Namespace::OnDemand,
            CacheData::new(key.as_str())
                .with_attributes(attributes)
                .with_ttl(self.on_demand_ttl_seconds()),
        );
        info!(
            "Agent {} stored on-demand data for {}.",
            self.on_demand_agent_type(),
            key
        );

        Ok(Some(OnDemandResult {
            source_agent_type: self.on_demand_agent_type(),
            cache_result,
            evictions: IndexMap::new(),
            authoritative_types: Vec::new(),
        }))
    }

    /// The server group is gone: drop any pending refresh for it and report
    /// its cached keys for eviction.
    fn evict_missing(&self, cache: &ProviderCache, name: &str) -> OnDemandResult {
        let moniker = Moniker::derive(name);
        let zone = match self.scope.kind {
            ScopeKind::Zonal => Some("*"),
            ScopeKind::Regional => None,
        };
        let pattern = server_group_pattern(
            self.account(),
            self.region(),
            zone,
            &moniker.cluster,
            name,
        );
        let keys: Vec<String> = cache
            .filter_identifiers(Namespace::ServerGroups, &pattern)
            .into_iter()
            .filter(|key| self.scope.owns_encoded(key))
            .collect();

        let mut evictions = IndexMap::new();
        if keys.is_empty() {
            debug!(
                "Agent {} found no cached server group named {}.",
                self.on_demand_agent_type(),
                name
            );
        } else {
            let removed = cache.evict(Namespace::OnDemand, &keys);
            ON_DEMAND_EVICTIONS_TOTAL.inc_by(removed as f64);
            info!(
                "Agent {} evicting missing server group {} ({} keys).",
                self.on_demand_agent_type(),
                name,
                keys.len()
            );
            evictions.insert(Namespace::ServerGroups, keys);
        }

        OnDemandResult {
            source_agent_type: self.on_demand_agent_type(),
            cache_result: CacheResult::default(),
            evictions,
            authoritative_types: Vec::new(),
        }
    }

    /// Lists the `ON_DEMAND` entries this agent owns.
    pub fn pending_on_demand_requests(&self, cache: &ProviderCache) -> Vec<PendingOnDemandRequest> {
        let owned: Vec<String> = cache
            .identifiers(Namespace::OnDemand)
            .into_iter()
            .filter(|key| self.scope.owns_encoded(key))
            .collect();

        cache
            .get_all(Namespace::OnDemand, &owned)
            .into_iter()
            .filter_map(|entry| {
                let details = ResourceKey::decode(&entry.id).ok()?.parse_details();
                Some(PendingOnDemandRequest {
                    id: entry.id.clone(),
                    details,
                    moniker: entry.attributes.get("moniker").cloned(),
                    cache_time: entry.attribute_i64("cacheTime"),
                    processed_count: entry.attribute_i64("processedCount").unwrap_or(0),
                    processed_time: entry.attribute_i64("processedTime"),
                })
            })
            .collect()
    }
}
