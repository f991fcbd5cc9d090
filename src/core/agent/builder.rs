// src/core/agent/builder.rs

//! Accumulates the upserts and evictions of one agent pass.

use crate::core::keys::Namespace;
use crate::core::storage::{Attributes, CacheData, CacheResult, Relationships};
use indexmap::{IndexMap, IndexSet};

/// A mutable entry under construction. Relationship lists stay deduplicated.
#[derive(Debug, Clone)]
pub struct CacheDataBuilder {
    pub id: String,
    pub attributes: Attributes,
    pub relationships: Relationships,
    pub ttl_seconds: Option<u32>,
}

impl CacheDataBuilder {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            attributes: Attributes::new(),
            relationships: Relationships::new(),
            ttl_seconds: None,
        }
    }

    /// Adds `keys` to the relationship list for `namespace`.
    pub fn relate<I, S>(&mut self, namespace: Namespace, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationships
            .entry(namespace)
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }

    fn build(self) -> CacheData {
        CacheData {
            id: self.id,
            attributes: self.attributes,
            relationships: self.relationships,
            ttl_seconds: self.ttl_seconds,
        }
    }
}

#[derive(Debug, Default)]
pub struct NamespaceBuilder {
    to_keep: IndexMap<String, CacheDataBuilder>,
    to_evict: IndexSet<String>,
}

impl NamespaceBuilder {
    /// Returns the entry for `key`, creating an empty one on first use.
    pub fn keep(&mut self, key: &str) -> &mut CacheDataBuilder {
        self.to_keep
            .entry(key.to_string())
            .or_insert_with(|| CacheDataBuilder::new(key))
    }

    pub fn evict(&mut self, key: &str) {
        self.to_evict.insert(key.to_string());
    }

    pub fn keep_count(&self) -> usize {
        self.to_keep.len()
    }

    pub fn evict_count(&self) -> usize {
        self.to_evict.len()
    }
}

#[derive(Debug)]
pub struct CacheResultBuilder {
    start_time: i64,
    namespaces: IndexMap<Namespace, NamespaceBuilder>,
    on_demand_guards: IndexMap<String, Option<i64>>,
}

impl CacheResultBuilder {
    pub fn new(start_time: i64) -> Self {
        Self {
            start_time,
            namespaces: IndexMap::new(),
            on_demand_guards: IndexMap::new(),
        }
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn namespace(&mut self, namespace: Namespace) -> &mut NamespaceBuilder {
        self.namespaces.entry(namespace).or_default()
    }

    pub fn on_demand(&mut self) -> &mut NamespaceBuilder {
        self.namespace(Namespace::OnDemand)
    }

    /// Makes the `ON_DEMAND` decision for `key` conditional on the stored entry
    /// still having the `cacheTime` this pass observed.
    pub fn guard_on_demand(&mut self, key: &str, observed_cache_time: Option<i64>) {
        self.on_demand_guards
            .insert(key.to_string(), observed_cache_time);
    }

    pub fn build(self) -> CacheResult {
        let mut cache_results = IndexMap::new();
        let mut evictions = IndexMap::new();
        for (namespace, builder) in self.namespaces {
            if !builder.to_keep.is_empty() {
                cache_results.insert(
                    namespace,
                    builder
                        .to_keep
                        .into_values()
                        .map(CacheDataBuilder::build)
                        .collect(),
                );
            }
            if !builder.to_evict.is_empty() {
                evictions.insert(namespace, builder.to_evict.into_iter().collect());
            }
        }
        let mut result = CacheResult::new(cache_results, evictions);
        result.on_demand_guards = self.on_demand_guards;
        result
    }
}
