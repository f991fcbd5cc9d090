// src/core/storage/provider_cache.rs

//! The shared, namespaced store that caching agents write into and readers query.

use super::cache_data::{CacheData, Relationships, merge_relationships};
use super::cache_result::CacheResult;
use crate::core::clock::SharedClock;
use crate::core::keys::Namespace;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::debug;
use wildmatch::WildMatch;

/// Source name for relationships written outside an agent pass.
const UNATTRIBUTED: &str = "";

/// A stored entry together with its resolved expiry deadline.
#[derive(Debug, Clone)]
struct StoredEntry {
    /// The entry as readers see it. Its relationships are the union of `sources`.
    data: Arc<CacheData>,
    /// Epoch millis after which the entry is treated as absent. `None` never expires.
    expires_at: Option<i64>,
    /// Relationships contributed by each writer, keyed by agent id.
    sources: IndexMap<String, Relationships>,
}

impl StoredEntry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }

    /// Drops `agent`'s relationships and refreshes the merged view.
    fn strip_source(&mut self, agent: &str) -> bool {
        if self.sources.shift_remove(agent).is_none() {
            return false;
        }
        let mut data = (*self.data).clone();
        data.relationships = union_of(&self.sources);
        self.data = Arc::new(data);
        true
    }
}

fn union_of(sources: &IndexMap<String, Relationships>) -> Relationships {
    let mut merged = Relationships::new();
    for relationships in sources.values() {
        merge_relationships(&mut merged, relationships);
    }
    merged
}

type Table = HashMap<String, StoredEntry>;

/// Keys per agent per namespace.
type AgentKeys = HashMap<String, HashMap<Namespace, HashSet<String>>>;

/// Bookkeeping guarded by the apply lock.
#[derive(Debug, Default)]
struct Ledger {
    /// Keys each agent wrote into its authoritative namespaces on its last apply.
    claims: AgentKeys,
    /// Keys each sweeping agent attached relationships to in informative
    /// namespaces on its last apply.
    contributions: AgentKeys,
    /// Agents that have applied a full pass, one with authoritative namespaces.
    sweepers: HashSet<String>,
}

impl Ledger {
    fn claims(&self, agent: &str, namespace: Namespace, key: &str) -> bool {
        self.claims
            .get(agent)
            .and_then(|claims| claims.get(&namespace))
            .is_some_and(|keys| keys.contains(key))
    }

    fn claimed_elsewhere(&self, agent: &str, namespace: Namespace, key: &str) -> bool {
        self.claims
            .keys()
            .any(|other| other != agent && self.claims(other, namespace, key))
    }

    /// Forgets every agent's interest in a removed key.
    fn release(&mut self, namespace: Namespace, key: &str) {
        for index in [&mut self.claims, &mut self.contributions] {
            for keys in index.values_mut() {
                if let Some(keys) = keys.get_mut(&namespace) {
                    keys.remove(key);
                }
            }
        }
    }
}

/// The provider cache.
///
/// Each namespace is an independent table behind its own `RwLock`. Writes that
/// go through [`ProviderCache::put_cache_result`] are serialized by a single
/// apply lock that also guards the ledger of claims and contributions, so the
/// set of keys an agent previously wrote is always read and replaced in the
/// same critical section as the eviction decision.
///
/// Relationships are tracked per writing agent. Readers see the union of
/// every agent's contribution, and an agent's next pass replaces only its own.
#[derive(Debug)]
pub struct ProviderCache {
    tables: IndexMap<Namespace, RwLock<Table>>,
    /// The apply lock.
    ledger: Mutex<Ledger>,
    clock: SharedClock,
}

impl ProviderCache {
    pub fn new(clock: SharedClock) -> Self {
        let tables = Namespace::iter()
            .map(|ns| (ns, RwLock::new(Table::new())))
            .collect();
        Self {
            tables,
            ledger: Mutex::new(Ledger::default()),
            clock,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn table(&self, namespace: Namespace) -> &RwLock<Table> {
        // Every variant is inserted in `new`.
        &self.tables[&namespace]
    }

    fn stored(&self, data: CacheData, now: i64) -> StoredEntry {
        let mut sources = IndexMap::new();
        if !data.relationships.is_empty() {
            sources.insert(UNATTRIBUTED.to_string(), data.relationships.clone());
        }
        self.stored_with_sources(data, sources, now)
    }

    fn stored_with_sources(
        &self,
        mut data: CacheData,
        sources: IndexMap<String, Relationships>,
        now: i64,
    ) -> StoredEntry {
        let expires_at = data
            .ttl_seconds
            .map(|ttl| now.saturating_add(i64::from(ttl) * 1000));
        data.relationships = union_of(&sources);
        StoredEntry {
            data: Arc::new(data),
            expires_at,
            sources,
        }
    }

    /// Returns the live entry for `key`, if any.
    pub fn get(&self, namespace: Namespace, key: &str) -> Option<Arc<CacheData>> {
        let now = self.clock.now_millis();
        self.table(namespace)
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.data.clone())
    }

    /// Returns the live entries among `keys`, in the order the keys were given.
    pub fn get_all<I, S>(&self, namespace: Namespace, keys: I) -> Vec<Arc<CacheData>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = self.clock.now_millis();
        let table = self.table(namespace).read();
        keys.into_iter()
            .filter_map(|key| table.get(AsRef::<str>::as_ref(&key)))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.data.clone())
            .collect()
    }

    /// Returns every live entry in `namespace`, sorted by key.
    pub fn get_all_in(&self, namespace: Namespace) -> Vec<Arc<CacheData>> {
        let now = self.clock.now_millis();
        let table = self.table(namespace).read();
        let mut entries: Vec<_> = table
            .values()
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.data.clone())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Returns all live keys in `namespace`, sorted.
    pub fn identifiers(&self, namespace: Namespace) -> Vec<String> {
        let now = self.clock.now_millis();
        let table = self.table(namespace).read();
        let mut keys: Vec<String> = table
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Returns all live keys in `namespace` matching the glob `pattern`, sorted.
    pub fn filter_identifiers(&self, namespace: Namespace, pattern: &str) -> Vec<String> {
        let matcher = WildMatch::new(pattern);
        let now = self.clock.now_millis();
        let table = self.table(namespace).read();
        let mut keys: Vec<String> = table
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && matcher.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Returns the subset of `keys` that are currently live in `namespace`.
    pub fn existing_identifiers<I, S>(&self, namespace: Namespace, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = self.clock.now_millis();
        let table = self.table(namespace).read();
        keys.into_iter()
            .map(|key| key.as_ref().to_string())
            .filter(|key| table.get(key).is_some_and(|entry| entry.is_live(now)))
            .collect()
    }

    /// Follows the relationships of `data` into `target` and returns the live entries found.
    pub fn related(&self, data: &CacheData, target: Namespace) -> Vec<Arc<CacheData>> {
        self.get_all(target, data.related_keys(target))
    }

    /// Writes a single entry, replacing any existing one.
    pub fn put(&self, namespace: Namespace, data: CacheData) {
        let now = self.clock.now_millis();
        let entry = self.stored(data, now);
        self.table(namespace)
            .write()
            .insert(entry.data.id.clone(), entry);
    }

    /// Writes a batch of entries, replacing any existing ones.
    pub fn put_all(&self, namespace: Namespace, entries: Vec<CacheData>) {
        if entries.is_empty() {
            return;
        }
        let now = self.clock.now_millis();
        let mut table = self.table(namespace).write();
        for data in entries {
            let entry = self.stored(data, now);
            table.insert(entry.data.id.clone(), entry);
        }
    }

    /// Removes `keys` from `namespace`. Returns the number of entries removed.
    pub fn evict<I, S>(&self, namespace: Namespace, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<S> = keys.into_iter().collect();
        if keys.is_empty() {
            return 0;
        }
        let mut ledger = self.ledger.lock();
        let mut table = self.table(namespace).write();
        let mut removed = 0;
        for key in &keys {
            let key: &str = key.as_ref();
            if table.remove(key).is_some() {
                removed += 1;
            }
            ledger.release(namespace, key);
        }
        removed
    }

    /// Applies the result of one agent pass.
    ///
    /// Upserts into namespaces listed in `authoritative` replace the entry's
    /// attributes and this agent's relationships. Relationships from other
    /// agents that also claim the key are kept; anything else is dropped. Any
    /// key this agent wrote there on a previous apply that is absent from this
    /// result is evicted, unless another agent still claims it, in which case
    /// only this agent's relationships are removed from it.
    ///
    /// Upserts into other namespaces are informative. They replace this
    /// agent's relationships on the entry, and an empty attribute map keeps
    /// the existing attributes. A full pass (one with authoritative
    /// namespaces) also withdraws the agent's relationships from informative
    /// keys it no longer writes, and drops contributions from writers that
    /// never sweep, such as on-demand refreshes, since a sweep already lays
    /// fresh on-demand data over its own result.
    ///
    /// `ON_DEMAND` upserts and evictions listed in the result's guards are
    /// skipped when the stored entry's `cacheTime` no longer matches. Explicit
    /// evictions are applied last.
    pub fn put_cache_result(
        &self,
        agent_id: &str,
        authoritative: &[Namespace],
        result: CacheResult,
    ) {
        let now = self.clock.now_millis();
        let mut ledger = self.ledger.lock();
        let full_pass = !authoritative.is_empty();
        if full_pass {
            ledger.sweepers.insert(agent_id.to_string());
        }

        let CacheResult {
            mut cache_results,
            mut evictions,
            on_demand_guards,
            ..
        } = result;

        let mut touched: HashSet<Namespace> = cache_results
            .keys()
            .chain(evictions.keys())
            .chain(authoritative.iter())
            .copied()
            .collect();
        if full_pass && let Some(previous) = ledger.contributions.get(agent_id) {
            touched.extend(previous.keys().copied());
        }

        for namespace in touched {
            let upserts = cache_results.swap_remove(&namespace).unwrap_or_default();
            let explicit_evictions = evictions.swap_remove(&namespace).unwrap_or_default();
            let is_authoritative = authoritative.contains(&namespace);
            let guarded = |table: &Table, key: &str| {
                namespace == Namespace::OnDemand
                    && on_demand_guards.get(key).is_some_and(|expected| {
                        table
                            .get(key)
                            .filter(|entry| entry.is_live(now))
                            .is_none_or(|entry| entry.data.attribute_i64("cacheTime") != *expected)
                    })
            };

            let mut table = self.table(namespace).write();
            let mut written: HashSet<String> = HashSet::with_capacity(upserts.len());

            for mut data in upserts {
                if guarded(&*table, &data.id) {
                    debug!(
                        "Agent {} skipped {}: it was rewritten since the pass began.",
                        agent_id, data.id
                    );
                    continue;
                }
                written.insert(data.id.clone());

                let existing = table.get(&data.id).filter(|entry| entry.is_live(now));
                let mut sources = existing.map(|e| e.sources.clone()).unwrap_or_default();
                if is_authoritative {
                    sources.retain(|source, _| {
                        source == agent_id || ledger.claims(source, namespace, &data.id)
                    });
                } else {
                    if full_pass {
                        sources.retain(|source, _| {
                            source == agent_id || ledger.sweepers.contains(source)
                        });
                    }
                    if data.attributes.is_empty()
                        && let Some(existing) = existing
                    {
                        data.attributes = existing.data.attributes.clone();
                    }
                }
                sources.insert(agent_id.to_string(), std::mem::take(&mut data.relationships));

                let entry = self.stored_with_sources(data, sources, now);
                table.insert(entry.data.id.clone(), entry);
            }

            if is_authoritative {
                let previous = ledger
                    .claims
                    .get_mut(agent_id)
                    .and_then(|claims| claims.remove(&namespace))
                    .unwrap_or_default();
                let mut stale = 0usize;
                for key in previous.difference(&written) {
                    if ledger.claimed_elsewhere(agent_id, namespace, key) {
                        if let Some(entry) = table.get_mut(key) {
                            entry.strip_source(agent_id);
                        }
                    } else if table.remove(key).is_some() {
                        stale += 1;
                    }
                }
                if stale > 0 {
                    debug!(
                        "Agent {} evicted {} stale {} entries.",
                        agent_id, stale, namespace
                    );
                }
                ledger
                    .claims
                    .entry(agent_id.to_string())
                    .or_default()
                    .insert(namespace, written);
            } else if full_pass {
                let previous = ledger
                    .contributions
                    .get_mut(agent_id)
                    .and_then(|contributions| contributions.remove(&namespace))
                    .unwrap_or_default();
                let mut withdrawn = 0usize;
                for key in previous.difference(&written) {
                    if let Some(entry) = table.get_mut(key)
                        && entry.strip_source(agent_id)
                    {
                        withdrawn += 1;
                    }
                }
                if withdrawn > 0 {
                    debug!(
                        "Agent {} withdrew relationships from {} {} entries.",
                        agent_id, withdrawn, namespace
                    );
                }
                if !written.is_empty() {
                    ledger
                        .contributions
                        .entry(agent_id.to_string())
                        .or_default()
                        .insert(namespace, written);
                }
            }

            for key in &explicit_evictions {
                if guarded(&*table, key) {
                    debug!(
                        "Agent {} kept {}: it was rewritten since the pass began.",
                        agent_id, key
                    );
                    continue;
                }
                table.remove(key);
                ledger.release(namespace, key);
            }
        }
    }

    /// Drops every expired entry. Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut purged = 0;
        for table in self.tables.values() {
            let mut table = table.write();
            let before = table.len();
            table.retain(|_, entry| entry.is_live(now));
            purged += before - table.len();
        }
        purged
    }

    /// Returns the number of stored entries per namespace, including expired
    /// entries that have not been purged yet.
    pub fn entry_counts(&self) -> Vec<(Namespace, usize)> {
        self.tables
            .iter()
            .map(|(ns, table)| (*ns, table.read().len()))
            .collect()
    }
}
