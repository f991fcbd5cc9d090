// src/core/agent/provider.rs

//! The capability trait through which caching agents read live compute state.

use super::model::{Autoscaler, Instance, InstanceGroupManager, InstanceTemplate, local_name};
use super::server_group::region_from_zone;
use crate::core::errors::CacheError;
use crate::core::keys::ScopeKind;
use async_trait::async_trait;
use std::fmt::Debug;

/// The location a provider lists resources in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub region: String,
    /// Zones of the region a zonal agent covers. Ignored for regional agents.
    pub zones: Vec<String>,
    pub kind: ScopeKind,
}

impl Location {
    pub fn zonal(region: impl Into<String>, zones: Vec<String>) -> Self {
        Self {
            region: region.into(),
            zones,
            kind: ScopeKind::Zonal,
        }
    }

    pub fn regional(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zones: Vec::new(),
            kind: ScopeKind::Regional,
        }
    }

    /// Whether a resource in `zone` (a name or URL) is visible from this location.
    pub fn covers_zone(&self, zone: &str) -> bool {
        let zone = local_name(zone);
        match self.kind {
            ScopeKind::Zonal => self.zones.iter().any(|z| z == zone),
            ScopeKind::Regional => region_from_zone(zone) == self.region,
        }
    }

    /// Whether a manager or autoscaler located by `zone`/`region` URLs belongs here.
    pub fn covers_scope(&self, zone: Option<&str>, region: Option<&str>) -> bool {
        match (self.kind, zone) {
            (ScopeKind::Zonal, Some(zone)) => self.covers_zone(zone),
            (ScopeKind::Regional, None) => region.map(local_name) == Some(self.region.as_str()),
            _ => false,
        }
    }

    pub fn covers_manager(&self, manager: &InstanceGroupManager) -> bool {
        self.covers_scope(manager.zone.as_deref(), manager.region.as_deref())
    }
}

/// Read access to a compute account, scoped to one agent's location.
///
/// Every failure is reported as [`CacheError::ProviderFetch`].
#[async_trait]
pub trait ComputeProvider: Send + Sync + Debug {
    /// Lists the instance group managers in this location.
    async fn instance_group_managers(&self) -> Result<Vec<InstanceGroupManager>, CacheError>;

    /// Looks up a single manager by name. Zonal providers search every covered zone.
    async fn instance_group_manager(
        &self,
        name: &str,
    ) -> Result<Option<InstanceGroupManager>, CacheError>;

    /// Lists the instances in this location.
    async fn instances(&self) -> Result<Vec<Instance>, CacheError>;

    /// Lists the instances that may belong to `manager`.
    async fn relevant_instances(
        &self,
        manager: &InstanceGroupManager,
    ) -> Result<Vec<Instance>, CacheError> {
        let Some(base) = manager.base_instance_name.as_deref() else {
            return Ok(Vec::new());
        };
        let zone = manager.zone_name();
        Ok(self
            .instances()
            .await?
            .into_iter()
            .filter(|i| i.name.starts_with(base))
            .filter(|i| zone.is_none_or(|z| z == i.zone_name()))
            .collect())
    }

    /// Lists every instance template in the project.
    async fn instance_templates(&self) -> Result<Vec<InstanceTemplate>, CacheError>;

    async fn instance_template(&self, name: &str) -> Result<Option<InstanceTemplate>, CacheError>;

    /// Lists the autoscalers in this location.
    async fn autoscalers(&self) -> Result<Vec<Autoscaler>, CacheError>;

    /// Finds the autoscaler targeting `manager`, if any.
    async fn autoscaler(
        &self,
        manager: &InstanceGroupManager,
    ) -> Result<Option<Autoscaler>, CacheError> {
        Ok(self.autoscalers().await?.into_iter().find(|a| {
            local_name(&a.target) == manager.name
                && a.zone.as_deref().map(local_name) == manager.zone_name()
                && a.region.as_deref().map(local_name) == manager.region_name()
        }))
    }
}
