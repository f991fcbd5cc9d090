// tests/integration/store_test.rs

//! Integration tests for the provider cache
//! Tests: reads, TTL, glob filters, authoritative and informative writes

use super::fixtures::START_MILLIS;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use topocache::core::clock::ManualClock;
use topocache::core::keys::Namespace;
use topocache::core::storage::{CacheData, CacheResult, ProviderCache};

fn new_cache() -> (ManualClock, ProviderCache) {
    let clock = ManualClock::new(START_MILLIS);
    let cache = ProviderCache::new(Arc::new(clock.clone()));
    (clock, cache)
}

fn attrs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn entry(id: &str, attributes: Value, related: &[(Namespace, &[&str])]) -> CacheData {
    let relationships = related
        .iter()
        .map(|(ns, keys)| (*ns, keys.iter().map(|k| k.to_string()).collect::<IndexSet<_>>()))
        .collect();
    CacheData::new(id)
        .with_attributes(attrs(attributes))
        .with_relationships(relationships)
}

fn result(namespace: Namespace, entries: Vec<CacheData>) -> CacheResult {
    CacheResult::new(IndexMap::from([(namespace, entries)]), IndexMap::new())
}

fn keys(cache: &ProviderCache, namespace: Namespace) -> Vec<String> {
    cache.identifiers(namespace)
}

// ===== Read Tests =====

#[test]
fn test_put_and_get() {
    let (_, cache) = new_cache();
    cache.put(
        Namespace::Applications,
        entry("gce:applications:myapp", json!({ "name": "myapp" }), &[]),
    );

    let data = cache.get(Namespace::Applications, "gce:applications:myapp").unwrap();
    assert_eq!(data.attribute_str("name"), Some("myapp"));
    assert!(cache.get(Namespace::Clusters, "gce:applications:myapp").is_none());
    assert!(cache.get(Namespace::Applications, "gce:applications:other").is_none());
}

#[test]
fn test_get_all_preserves_request_order_and_skips_missing() {
    let (_, cache) = new_cache();
    cache.put_all(
        Namespace::Applications,
        vec![
            entry("gce:applications:a", json!({}), &[]),
            entry("gce:applications:b", json!({}), &[]),
        ],
    );

    let found: Vec<String> = cache
        .get_all(
            Namespace::Applications,
            ["gce:applications:b", "gce:applications:missing", "gce:applications:a"],
        )
        .iter()
        .map(|d| d.id.clone())
        .collect();
    assert_eq!(found, vec!["gce:applications:b", "gce:applications:a"]);

    assert_eq!(
        cache.existing_identifiers(
            Namespace::Applications,
            ["gce:applications:a", "gce:applications:zzz"]
        ),
        vec!["gce:applications:a"]
    );
}

#[test]
fn test_filter_identifiers_with_glob() {
    let (_, cache) = new_cache();
    cache.put_all(
        Namespace::ServerGroups,
        vec![
            entry("gce:serverGroups:acct:us-central1:us-central1-f:app-dev:app-dev-v000", json!({}), &[]),
            entry("gce:serverGroups:acct:us-central1::app-dev:app-dev-v000", json!({}), &[]),
            entry("gce:serverGroups:acct:us-east1:us-east1-b:app-dev:app-dev-v000", json!({}), &[]),
        ],
    );

    assert_eq!(
        cache.filter_identifiers(Namespace::ServerGroups, "gce:serverGroups:acct:us-central1:*"),
        vec![
            "gce:serverGroups:acct:us-central1::app-dev:app-dev-v000",
            "gce:serverGroups:acct:us-central1:us-central1-f:app-dev:app-dev-v000",
        ]
    );
    assert_eq!(
        cache.filter_identifiers(Namespace::ServerGroups, "*:app-dev-v00?").len(),
        3
    );
    assert!(cache
        .filter_identifiers(Namespace::ServerGroups, "gce:serverGroups:other:*")
        .is_empty());
}

#[test]
fn test_related_follows_live_relationships() {
    let (_, cache) = new_cache();
    cache.put(
        Namespace::Clusters,
        entry("gce:clusters:acct:app:app-dev", json!({}), &[]),
    );
    let app = entry(
        "gce:applications:app",
        json!({}),
        &[(
            Namespace::Clusters,
            &["gce:clusters:acct:app:app-dev", "gce:clusters:acct:app:gone"],
        )],
    );

    let related = cache.related(&app, Namespace::Clusters);
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].id, "gce:clusters:acct:app:app-dev");
    assert!(cache.related(&app, Namespace::Instances).is_empty());
}

// ===== TTL Tests =====

#[test]
fn test_entries_expire_after_ttl() {
    let (clock, cache) = new_cache();
    cache.put(
        Namespace::OnDemand,
        entry("gce:serverGroups:a:r::c:c-v000", json!({}), &[]).with_ttl(10),
    );
    cache.put(
        Namespace::Applications,
        entry("gce:applications:forever", json!({}), &[]),
    );

    clock.advance(9_999);
    assert_eq!(keys(&cache, Namespace::OnDemand).len(), 1);

    clock.advance(1);
    assert!(keys(&cache, Namespace::OnDemand).is_empty());
    assert!(cache.get(Namespace::OnDemand, "gce:serverGroups:a:r::c:c-v000").is_none());

    // Expired entries linger until purged.
    let counts: IndexMap<Namespace, usize> = cache.entry_counts().into_iter().collect();
    assert_eq!(counts[&Namespace::OnDemand], 1);
    assert_eq!(cache.purge_expired(), 1);
    let counts: IndexMap<Namespace, usize> = cache.entry_counts().into_iter().collect();
    assert_eq!(counts[&Namespace::OnDemand], 0);
    assert_eq!(counts[&Namespace::Applications], 1);
}

#[test]
fn test_evict_counts_removed_entries() {
    let (_, cache) = new_cache();
    cache.put(Namespace::Instances, entry("gce:instances:a:r:i1", json!({}), &[]));
    cache.put(Namespace::Instances, entry("gce:instances:a:r:i2", json!({}), &[]));

    assert_eq!(
        cache.evict(Namespace::Instances, ["gce:instances:a:r:i1", "gce:instances:a:r:nope"]),
        1
    );
    assert_eq!(cache.evict(Namespace::Instances, Vec::<String>::new()), 0);
    assert_eq!(keys(&cache, Namespace::Instances), vec!["gce:instances:a:r:i2"]);
}

// ===== Authoritative Write Tests =====

#[test]
fn test_authoritative_result_evicts_previous_keys() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::ServerGroups];

    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(
            Namespace::ServerGroups,
            vec![entry("sg-1", json!({}), &[]), entry("sg-2", json!({}), &[])],
        ),
    );
    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(Namespace::ServerGroups, vec![entry("sg-1", json!({}), &[])]),
    );

    assert_eq!(keys(&cache, Namespace::ServerGroups), vec!["sg-1"]);
}

#[test]
fn test_authoritative_result_with_no_entries_clears_namespace() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::Instances];
    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(Namespace::Instances, vec![entry("i-1", json!({}), &[])]),
    );
    cache.put_cache_result("agent-a", &authoritative, CacheResult::default());

    assert!(keys(&cache, Namespace::Instances).is_empty());
}

#[test]
fn test_authoritative_write_replaces_relationships() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::Clusters];
    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(
            Namespace::Clusters,
            vec![entry("c-1", json!({ "v": 1 }), &[(Namespace::ServerGroups, &["sg-1"])])],
        ),
    );
    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(
            Namespace::Clusters,
            vec![entry("c-1", json!({ "v": 2 }), &[(Namespace::ServerGroups, &["sg-2"])])],
        ),
    );

    let cluster = cache.get(Namespace::Clusters, "c-1").unwrap();
    assert_eq!(cluster.attributes["v"], json!(2));
    let related: Vec<&String> = cluster.related_keys(Namespace::ServerGroups).collect();
    assert_eq!(related, vec!["sg-2"]);
}

#[test]
fn test_keys_claimed_by_another_agent_survive() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::Applications];
    let app = || result(Namespace::Applications, vec![entry("app", json!({}), &[])]);

    cache.put_cache_result("agent-a", &authoritative, app());
    cache.put_cache_result("agent-b", &authoritative, app());

    cache.put_cache_result("agent-a", &authoritative, CacheResult::default());
    assert_eq!(keys(&cache, Namespace::Applications), vec!["app"]);

    cache.put_cache_result("agent-b", &authoritative, CacheResult::default());
    assert!(keys(&cache, Namespace::Applications).is_empty());
}

#[test]
fn test_shared_key_keeps_relationships_from_every_claiming_agent() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::Applications];
    let app = |cluster: &str| {
        result(
            Namespace::Applications,
            vec![entry("app", json!({ "name": "app" }), &[(Namespace::Clusters, &[cluster])])],
        )
    };

    cache.put_cache_result("agent-a", &authoritative, app("c-a"));
    cache.put_cache_result("agent-b", &authoritative, app("c-b"));
    let data = cache.get(Namespace::Applications, "app").unwrap();
    let related: Vec<&String> = data.related_keys(Namespace::Clusters).collect();
    assert_eq!(related, vec!["c-a", "c-b"]);

    // A rewrite replaces only the writer's own edges.
    cache.put_cache_result("agent-a", &authoritative, app("c-a2"));
    let data = cache.get(Namespace::Applications, "app").unwrap();
    let related: Vec<&String> = data.related_keys(Namespace::Clusters).collect();
    assert_eq!(related, vec!["c-a2", "c-b"]);

    // Dropping the key keeps it for agent-b but withdraws agent-a's edges.
    cache.put_cache_result("agent-a", &authoritative, CacheResult::default());
    let data = cache.get(Namespace::Applications, "app").unwrap();
    let related: Vec<&String> = data.related_keys(Namespace::Clusters).collect();
    assert_eq!(related, vec!["c-b"]);
}

#[test]
fn test_authoritative_write_drops_unclaimed_relationships() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::ServerGroups];
    // A partial pass, such as an on-demand refresh, claims nothing.
    cache.put_cache_result(
        "agent-a-OnDemand",
        &[],
        result(
            Namespace::ServerGroups,
            vec![entry("sg-1", json!({}), &[(Namespace::Instances, &["i-old"])])],
        ),
    );
    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(
            Namespace::ServerGroups,
            vec![entry("sg-1", json!({}), &[(Namespace::Instances, &["i-new"])])],
        ),
    );

    let sg = cache.get(Namespace::ServerGroups, "sg-1").unwrap();
    let related: Vec<&String> = sg.related_keys(Namespace::Instances).collect();
    assert_eq!(related, vec!["i-new"]);
}

#[test]
fn test_explicit_evictions_apply_after_upserts() {
    let (_, cache) = new_cache();
    cache.put(Namespace::OnDemand, entry("od-1", json!({}), &[]));
    let mut evictions = IndexMap::new();
    evictions.insert(Namespace::OnDemand, vec!["od-1".to_string(), "od-2".to_string()]);
    let with_evictions = CacheResult::new(
        IndexMap::from([(Namespace::OnDemand, vec![entry("od-2", json!({}), &[])])]),
        evictions,
    );

    cache.put_cache_result("agent-a", &[Namespace::ServerGroups], with_evictions);

    assert!(keys(&cache, Namespace::OnDemand).is_empty());
}

#[test]
fn test_explicit_eviction_releases_claims() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::ServerGroups];
    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(Namespace::ServerGroups, vec![entry("sg-1", json!({}), &[])]),
    );
    cache.put_cache_result(
        "agent-b",
        &authoritative,
        result(Namespace::ServerGroups, vec![entry("sg-1", json!({}), &[])]),
    );

    // Removing the key drops every claim on it, so a rewrite by one agent
    // is later evicted by that agent alone.
    cache.evict(Namespace::ServerGroups, ["sg-1"]);
    cache.put_cache_result(
        "agent-a",
        &authoritative,
        result(Namespace::ServerGroups, vec![entry("sg-1", json!({}), &[])]),
    );
    cache.put_cache_result("agent-a", &authoritative, CacheResult::default());

    assert!(keys(&cache, Namespace::ServerGroups).is_empty());
}

// ===== Informative Write Tests =====

#[test]
fn test_informative_write_merges_relationships() {
    let (_, cache) = new_cache();
    cache.put_cache_result(
        "agent-a",
        &[],
        result(
            Namespace::LoadBalancers,
            vec![entry("lb", json!({ "type": "network" }), &[(Namespace::ServerGroups, &["sg-1"])])],
        ),
    );
    cache.put_cache_result(
        "agent-b",
        &[],
        result(
            Namespace::LoadBalancers,
            vec![entry("lb", json!({}), &[(Namespace::ServerGroups, &["sg-2", "sg-1"])])],
        ),
    );

    let lb = cache.get(Namespace::LoadBalancers, "lb").unwrap();
    let related: Vec<&String> = lb.related_keys(Namespace::ServerGroups).collect();
    assert_eq!(related, vec!["sg-1", "sg-2"]);
    // Empty attributes keep what was there.
    assert_eq!(lb.attributes["type"], json!("network"));

    cache.put_cache_result(
        "agent-b",
        &[],
        result(Namespace::LoadBalancers, vec![entry("lb", json!({ "type": "http" }), &[])]),
    );
    let lb = cache.get(Namespace::LoadBalancers, "lb").unwrap();
    assert_eq!(lb.attributes["type"], json!("http"));
    // agent-b replaced its own edges; agent-a's remain.
    let related: Vec<&String> = lb.related_keys(Namespace::ServerGroups).collect();
    assert_eq!(related, vec!["sg-1"]);
}

#[test]
fn test_full_pass_withdraws_informative_edges_it_no_longer_writes() {
    let (_, cache) = new_cache();
    let authoritative = [Namespace::ServerGroups];
    let pass = |lbs: &[(&str, &str)]| {
        let mut results = IndexMap::new();
        results.insert(Namespace::ServerGroups, vec![entry("sg-1", json!({}), &[])]);
        results.insert(
            Namespace::LoadBalancers,
            lbs.iter()
                .map(|(lb, sg)| entry(lb, json!({}), &[(Namespace::ServerGroups, &[*sg])]))
                .collect(),
        );
        CacheResult::new(results, IndexMap::new())
    };

    cache.put_cache_result("agent-a", &authoritative, pass(&[("lb-1", "sg-1"), ("lb-2", "sg-1")]));
    cache.put_cache_result(
        "agent-b",
        &[],
        result(
            Namespace::LoadBalancers,
            vec![entry("lb-2", json!({}), &[(Namespace::ServerGroups, &["sg-9"])])],
        ),
    );
    cache.put_cache_result("agent-a", &authoritative, pass(&[("lb-1", "sg-1")]));

    let lb1 = cache.get(Namespace::LoadBalancers, "lb-1").unwrap();
    assert_eq!(lb1.related_keys(Namespace::ServerGroups).count(), 1);
    // agent-a no longer writes lb-2; agent-b's edge is left alone.
    let lb2 = cache.get(Namespace::LoadBalancers, "lb-2").unwrap();
    let related: Vec<&String> = lb2.related_keys(Namespace::ServerGroups).collect();
    assert_eq!(related, vec!["sg-9"]);
}

#[test]
fn test_informative_write_never_evicts() {
    let (_, cache) = new_cache();
    cache.put_cache_result(
        "agent-a",
        &[],
        result(Namespace::LoadBalancers, vec![entry("lb-1", json!({}), &[])]),
    );
    cache.put_cache_result(
        "agent-a",
        &[],
        result(Namespace::LoadBalancers, vec![entry("lb-2", json!({}), &[])]),
    );

    assert_eq!(keys(&cache, Namespace::LoadBalancers), vec!["lb-1", "lb-2"]);
}

#[test]
fn test_informative_write_does_not_merge_expired_entry() {
    let (clock, cache) = new_cache();
    cache.put(
        Namespace::LoadBalancers,
        entry("lb", json!({ "old": true }), &[(Namespace::ServerGroups, &["sg-old"])]).with_ttl(1),
    );
    clock.advance(1_000);

    cache.put_cache_result(
        "agent-a",
        &[],
        result(Namespace::LoadBalancers, vec![entry("lb", json!({}), &[(Namespace::ServerGroups, &["sg-new"])])]),
    );

    let lb = cache.get(Namespace::LoadBalancers, "lb").unwrap();
    let related: Vec<&String> = lb.related_keys(Namespace::ServerGroups).collect();
    assert_eq!(related, vec!["sg-new"]);
    assert!(lb.attributes.is_empty());
}

// ===== Guarded On-Demand Tests =====

fn on_demand_entry(key: &str, cache_time: i64, processed_count: i64) -> CacheData {
    entry(
        key,
        json!({ "cacheTime": cache_time, "processedCount": processed_count }),
        &[],
    )
}

#[test]
fn test_guarded_on_demand_writes_skip_rewritten_entries() {
    let (_, cache) = new_cache();
    cache.put(Namespace::OnDemand, on_demand_entry("od-kept", 100, 0));
    cache.put(Namespace::OnDemand, on_demand_entry("od-evicted", 100, 1));

    // What a pass decided from the entries it saw at cacheTime 100.
    let mut evictions = IndexMap::new();
    evictions.insert(Namespace::OnDemand, vec!["od-evicted".to_string()]);
    let mut decided = CacheResult::new(
        IndexMap::from([(Namespace::OnDemand, vec![on_demand_entry("od-kept", 100, 1)])]),
        evictions,
    );
    decided.on_demand_guards.insert("od-kept".into(), Some(100));
    decided.on_demand_guards.insert("od-evicted".into(), Some(100));

    // Both entries are refreshed before the decision is applied.
    cache.put(Namespace::OnDemand, on_demand_entry("od-kept", 200, 0));
    cache.put(Namespace::OnDemand, on_demand_entry("od-evicted", 200, 0));
    cache.put_cache_result("agent-a", &[Namespace::ServerGroups], decided.clone());

    for key in ["od-kept", "od-evicted"] {
        let data = cache.get(Namespace::OnDemand, key).unwrap();
        assert_eq!(data.attribute_i64("cacheTime"), Some(200), "{key}");
        assert_eq!(data.attribute_i64("processedCount"), Some(0), "{key}");
    }

    // Unchanged entries take the decision.
    cache.put(Namespace::OnDemand, on_demand_entry("od-kept", 100, 0));
    cache.put(Namespace::OnDemand, on_demand_entry("od-evicted", 100, 1));
    cache.put_cache_result("agent-a", &[Namespace::ServerGroups], decided);
    let kept = cache.get(Namespace::OnDemand, "od-kept").unwrap();
    assert_eq!(kept.attribute_i64("processedCount"), Some(1));
    assert!(cache.get(Namespace::OnDemand, "od-evicted").is_none());
}
