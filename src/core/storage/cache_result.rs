// src/core/storage/cache_result.rs

//! The batch produced by one agent pass: upserts and evictions per namespace.

use super::cache_data::CacheData;
use crate::core::errors::CacheError;
use crate::core::keys::Namespace;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upserts grouped by namespace. This is also the shape serialized into the
/// `cacheResults` attribute of an on-demand entry.
pub type CacheResultMap = IndexMap<Namespace, Vec<CacheData>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheResult {
    pub cache_results: CacheResultMap,
    #[serde(default)]
    pub evictions: IndexMap<Namespace, Vec<String>>,
    /// Free-form details about how the result was produced, such as timings.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub introspection: Map<String, Value>,
    /// `ON_DEMAND` keys whose upsert or eviction only applies while the stored
    /// entry still carries this `cacheTime`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub on_demand_guards: IndexMap<String, Option<i64>>,
}

impl CacheResult {
    pub fn new(cache_results: CacheResultMap, evictions: IndexMap<Namespace, Vec<String>>) -> Self {
        Self {
            cache_results,
            evictions,
            introspection: Map::new(),
            on_demand_guards: IndexMap::new(),
        }
    }

    pub fn get(&self, namespace: Namespace) -> &[CacheData] {
        self.cache_results
            .get(&namespace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Looks up a single upserted entry by namespace and id.
    pub fn find(&self, namespace: Namespace, id: &str) -> Option<&CacheData> {
        self.get(namespace).iter().find(|data| data.id == id)
    }

    pub fn evictions_for(&self, namespace: Namespace) -> &[String] {
        self.evictions
            .get(&namespace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.cache_results.values().all(Vec::is_empty) && self.evictions.values().all(Vec::is_empty)
    }

    /// Serializes the upserts into the JSON payload stored with an on-demand entry.
    pub fn to_payload(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(&self.cache_results)?)
    }

    /// Parses an on-demand payload. Namespaces with no entries are dropped.
    pub fn from_payload(payload: &str) -> Result<CacheResultMap, CacheError> {
        let mut parsed: CacheResultMap = serde_json::from_str(payload)?;
        parsed.retain(|_, entries| !entries.is_empty());
        Ok(parsed)
    }
}
