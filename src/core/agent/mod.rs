// src/core/agent/mod.rs

//! The server group caching agent.
//!
//! One agent covers one shard of the keyspace: an account and region, either
//! its zonal or its regional managed instance groups. It refreshes the shard
//! on a schedule (`load_data`) and on request (`handle`), and the two paths
//! meet through `ON_DEMAND` entries in the provider cache.

pub mod builder;
pub mod disks;
pub mod fixture;
pub mod model;
pub mod naming;
pub mod on_demand;
pub mod provider;
pub mod server_group;
pub mod sweep;

use self::builder::CacheResultBuilder;
use self::naming::Moniker;
use self::provider::ComputeProvider;
use self::server_group::{
    GLOBAL_LOAD_BALANCER_NAMES, REGIONAL_LOAD_BALANCER_NAMES, ServerGroup, ServerGroupInstance,
};
use crate::core::clock::SharedClock;
use crate::core::errors::CacheError;
use crate::core::keys::{GLOBAL_REGION, Namespace, ResourceKey, ScopeKind, ShardScope};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use self::on_demand::{OnDemandKind, OnDemandRequest, OnDemandResult, PendingOnDemandRequest};

/// Namespaces a sweep replaces in full. `LOAD_BALANCERS` is informative and
/// `ON_DEMAND` is never authoritative.
pub const AUTHORITATIVE_TYPES: [Namespace; 4] = [
    Namespace::ServerGroups,
    Namespace::Applications,
    Namespace::Clusters,
    Namespace::Instances,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Authoritative,
    Informative,
}

pub struct ServerGroupCachingAgent {
    scope: ShardScope,
    project: String,
    provider: Arc<dyn ComputeProvider>,
    clock: SharedClock,
    on_demand_ttl: Duration,
}

impl fmt::Debug for ServerGroupCachingAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerGroupCachingAgent")
            .field("agent_type", &self.agent_type())
            .field("project", &self.project)
            .finish()
    }
}

impl ServerGroupCachingAgent {
    pub fn new(
        scope: ShardScope,
        project: impl Into<String>,
        provider: Arc<dyn ComputeProvider>,
        clock: SharedClock,
        on_demand_ttl: Duration,
    ) -> Self {
        Self {
            scope,
            project: project.into(),
            provider,
            clock,
            on_demand_ttl,
        }
    }

    pub fn scope(&self) -> &ShardScope {
        &self.scope
    }

    pub fn account(&self) -> &str {
        &self.scope.account
    }

    pub fn region(&self) -> &str {
        &self.scope.region
    }

    /// `account/region/ZonalServerGroupCachingAgent` or its regional counterpart.
    pub fn agent_type(&self) -> String {
        let kind = match self.scope.kind {
            ScopeKind::Zonal => "Zonal",
            ScopeKind::Regional => "Regional",
        };
        format!(
            "{}/{}/{}ServerGroupCachingAgent",
            self.scope.account, self.scope.region, kind
        )
    }

    pub fn on_demand_agent_type(&self) -> String {
        format!("{}-OnDemand", self.agent_type())
    }

    pub fn provided_data_types(&self) -> Vec<(Namespace, Authority)> {
        let mut types: Vec<_> = AUTHORITATIVE_TYPES
            .iter()
            .map(|ns| (*ns, Authority::Authoritative))
            .collect();
        types.push((Namespace::LoadBalancers, Authority::Informative));
        types
    }

    pub fn authoritative_types(&self) -> &'static [Namespace] {
        &AUTHORITATIVE_TYPES
    }

    fn on_demand_ttl_seconds(&self) -> u32 {
        u32::try_from(self.on_demand_ttl.as_secs()).unwrap_or(u32::MAX)
    }

    /// The server group key for `server_group` in this agent's shard.
    fn server_group_key(&self, server_group: &ServerGroup, moniker: &Moniker) -> ResourceKey {
        ResourceKey::server_group(
            self.account(),
            self.region(),
            server_group.zone.clone(),
            moniker.cluster.as_str(),
            server_group.name.as_str(),
        )
    }

    /// Adds the entries describing `server_group` to `builder`.
    fn cache_server_group(
        &self,
        builder: &mut CacheResultBuilder,
        server_group: &ServerGroup,
    ) -> Result<(), CacheError> {
        let account = self.account();
        let region = self.region();
        let moniker = Moniker::derive(&server_group.name);

        let application_key = ResourceKey::application(moniker.app.as_str()).encode();
        let cluster_key =
            ResourceKey::cluster(account, moniker.app.as_str(), moniker.cluster.as_str()).encode();
        let server_group_key = self.server_group_key(server_group, &moniker).encode();
        let instance_keys: Vec<String> = server_group
            .instances
            .iter()
            .map(|i| ResourceKey::instance(account, region, i.name.as_str()).encode())
            .collect();
        let load_balancer_keys: Vec<String> = server_group
            .asg_names(REGIONAL_LOAD_BALANCER_NAMES)
            .into_iter()
            .map(|name| ResourceKey::load_balancer(account, region, name).encode())
            .chain(
                server_group
                    .asg_names(GLOBAL_LOAD_BALANCER_NAMES)
                    .into_iter()
                    .map(|name| ResourceKey::load_balancer(account, GLOBAL_REGION, name).encode()),
            )
            .collect();

        let application = builder
            .namespace(Namespace::Applications)
            .keep(&application_key);
        application
            .attributes
            .insert("name".into(), json!(moniker.app));
        application
            .relate(Namespace::Clusters, [cluster_key.clone()])
            .relate(Namespace::Instances, instance_keys.iter().cloned());

        let cluster = builder.namespace(Namespace::Clusters).keep(&cluster_key);
        cluster
            .attributes
            .insert("name".into(), json!(moniker.cluster));
        cluster
            .attributes
            .insert("accountName".into(), json!(account));
        cluster
            .attributes
            .insert("moniker".into(), serde_json::to_value(&moniker)?);
        cluster
            .relate(Namespace::Applications, [application_key.clone()])
            .relate(Namespace::ServerGroups, [server_group_key.clone()])
            .relate(Namespace::Instances, instance_keys.iter().cloned());

        for key in &load_balancer_keys {
            builder
                .namespace(Namespace::LoadBalancers)
                .keep(key)
                .relate(Namespace::ServerGroups, [server_group_key.clone()]);
        }

        for (instance, key) in server_group.instances.iter().zip(&instance_keys) {
            let entry = builder.namespace(Namespace::Instances).keep(key);
            entry.attributes = instance_attributes(instance)?;
            entry.relate(Namespace::ServerGroups, [server_group_key.clone()]);
        }

        let entry = builder
            .namespace(Namespace::ServerGroups)
            .keep(&server_group_key);
        entry.attributes = server_group.to_attributes()?;
        entry
            .relate(Namespace::Applications, [application_key])
            .relate(Namespace::Clusters, [cluster_key])
            .relate(Namespace::LoadBalancers, load_balancer_keys)
            .relate(Namespace::Instances, instance_keys);
        Ok(())
    }
}

fn instance_attributes(instance: &ServerGroupInstance) -> Result<serde_json::Map<String, Value>, CacheError> {
    match serde_json::to_value(instance)? {
        Value::Object(map) => Ok(map),
        _ => Err(CacheError::Serialization(format!(
            "instance '{}' serialized to a non-object",
            instance.name
        ))),
    }
}
