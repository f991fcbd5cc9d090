// src/core/storage/cache_data.rs

//! The unit of storage in the provider cache.

use crate::core::keys::Namespace;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The weakly typed attribute bag carried by every entry.
pub type Attributes = Map<String, Value>;
/// Outgoing edges of an entry, grouped by the namespace of the target keys.
pub type Relationships = IndexMap<Namespace, IndexSet<String>>;

/// A single cache entry. Entries are immutable once built; the store hands
/// them out behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheData {
    /// The encoded `ResourceKey` of this entry.
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relationships: Relationships,
    /// Time to live in seconds. `None` means the entry never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u32>,
}

impl CacheData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
            relationships: Relationships::new(),
            ttl_seconds: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_relationships(mut self, relationships: Relationships) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u32) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Returns the keys this entry points to in `namespace`, in insertion order.
    pub fn related_keys(&self, namespace: Namespace) -> impl Iterator<Item = &String> {
        self.relationships
            .get(&namespace)
            .into_iter()
            .flat_map(|keys| keys.iter())
    }

    pub fn attribute_i64(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(Value::as_i64)
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// Unions `other` into `base`, keeping the first-seen order of keys.
pub fn merge_relationships(base: &mut Relationships, other: &Relationships) {
    for (namespace, keys) in other {
        base.entry(*namespace)
            .or_default()
            .extend(keys.iter().cloned());
    }
}
