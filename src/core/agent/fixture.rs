// src/core/agent/fixture.rs

//! A `ComputeProvider` that serves a topology loaded from a JSON document.

use super::model::{Autoscaler, Instance, InstanceGroupManager, InstanceTemplate};
use super::provider::{ComputeProvider, Location};
use crate::core::errors::CacheError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The raw compute state of an account, in the provider's JSON representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    #[serde(default)]
    pub instance_group_managers: Vec<InstanceGroupManager>,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub instance_templates: Vec<InstanceTemplate>,
    #[serde(default)]
    pub autoscalers: Vec<Autoscaler>,
}

impl Topology {
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug)]
pub struct FixtureComputeProvider {
    location: Location,
    topology: RwLock<Topology>,
    /// When set, every call fails with this message.
    failure: RwLock<Option<String>>,
}

impl FixtureComputeProvider {
    pub fn new(location: Location, topology: Topology) -> Self {
        Self {
            location,
            topology: RwLock::new(topology),
            failure: RwLock::new(None),
        }
    }

    /// Loads the topology from a JSON file.
    pub async fn from_file(location: Location, path: &Path) -> Result<Self, CacheError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(Self::new(location, Topology::from_json(&contents)?))
    }

    /// Replaces the served topology.
    pub fn set_topology(&self, topology: Topology) {
        *self.topology.write() = topology;
    }

    /// Applies `f` to the served topology in place.
    pub fn update<F: FnOnce(&mut Topology)>(&self, f: F) {
        f(&mut *self.topology.write());
    }

    /// Makes every subsequent call fail with `message`, or succeed again with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(str::to_string);
    }

    fn check(&self) -> Result<(), CacheError> {
        match self.failure.read().as_deref() {
            Some(message) => Err(CacheError::ProviderFetch(message.to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ComputeProvider for FixtureComputeProvider {
    async fn instance_group_managers(&self) -> Result<Vec<InstanceGroupManager>, CacheError> {
        self.check()?;
        Ok(self
            .topology
            .read()
            .instance_group_managers
            .iter()
            .filter(|m| self.location.covers_manager(m))
            .cloned()
            .collect())
    }

    async fn instance_group_manager(
        &self,
        name: &str,
    ) -> Result<Option<InstanceGroupManager>, CacheError> {
        Ok(self
            .instance_group_managers()
            .await?
            .into_iter()
            .find(|m| m.name == name))
    }

    async fn instances(&self) -> Result<Vec<Instance>, CacheError> {
        self.check()?;
        Ok(self
            .topology
            .read()
            .instances
            .iter()
            .filter(|i| self.location.covers_zone(&i.zone))
            .cloned()
            .collect())
    }

    async fn instance_templates(&self) -> Result<Vec<InstanceTemplate>, CacheError> {
        self.check()?;
        Ok(self.topology.read().instance_templates.clone())
    }

    async fn instance_template(&self, name: &str) -> Result<Option<InstanceTemplate>, CacheError> {
        Ok(self
            .instance_templates()
            .await?
            .into_iter()
            .find(|t| t.name == name))
    }

    async fn autoscalers(&self) -> Result<Vec<Autoscaler>, CacheError> {
        self.check()?;
        Ok(self
            .topology
            .read()
            .autoscalers
            .iter()
            .filter(|a| {
                self.location
                    .covers_scope(a.zone.as_deref(), a.region.as_deref())
            })
            .cloned()
            .collect())
    }
}
