// tests/property/sweep_idempotence_test.rs

//! Property-based tests for sweeps
//! Tests that repeated sweeps converge, that vanished server groups are
//! evicted, and that ON_DEMAND entries are reconciled by cache time.

use crate::fixtures::{ZONE, add_zonal_group, basic_topology, remove_group};
use crate::test_helpers::{TestContext, put_on_demand, zonal_key};
use proptest::collection::btree_set;
use proptest::prelude::*;
use topocache::core::keys::Namespace;

/// Snapshot of every server group and its attributes, in key order.
fn server_groups(ctx: &TestContext) -> Vec<(String, serde_json::Value)> {
    let mut keys = ctx.cache().identifiers(Namespace::ServerGroups);
    keys.sort();
    keys.into_iter()
        .filter_map(|key| {
            let data = ctx.get(Namespace::ServerGroups, &key)?;
            let attributes = serde_json::to_value(&data.attributes).ok()?;
            Some((key, attributes))
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_repeated_sweeps_converge(
        names in btree_set("svc[a-z]{1,6}-v[0-9]{3}", 0..6)
    ) {
        tokio_test::block_on(async {
            let ctx = TestContext::new(basic_topology());
            ctx.update_topology(|topology| {
                for name in &names {
                    add_zonal_group(topology, name);
                }
            });

            ctx.sweep_all().await;
            let first = server_groups(&ctx);
            ctx.sweep_all().await;
            let second = server_groups(&ctx);

            // Two from the base topology plus every added zonal group.
            assert_eq!(first.len(), names.len() + 2);
            assert_eq!(first, second);
        });
    }

    #[test]
    fn test_vanished_groups_are_evicted(
        names in btree_set("svc[a-z]{1,6}-v[0-9]{3}", 1..6),
        keep_mask in any::<u8>()
    ) {
        tokio_test::block_on(async {
            let ctx = TestContext::new(basic_topology());
            ctx.update_topology(|topology| {
                for name in &names {
                    add_zonal_group(topology, name);
                }
            });
            ctx.sweep_all().await;

            let removed: Vec<&String> = names
                .iter()
                .enumerate()
                .filter(|(i, _)| keep_mask & (1 << i) == 0)
                .map(|(_, name)| name)
                .collect();
            ctx.update_topology(|topology| {
                for name in &removed {
                    remove_group(topology, name);
                }
            });
            ctx.sweep_all().await;

            for name in &names {
                let present = ctx.get(Namespace::ServerGroups, &zonal_key(name, ZONE)).is_some();
                assert_eq!(present, !removed.contains(&name), "{name}");
            }
        });
    }

    #[test]
    fn test_on_demand_entries_reconcile_by_cache_time(
        offset in -5_000i64..5_000,
        processed_count in 0i64..3
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::new(basic_topology());
            let key = zonal_key("myapp-dev-v000", ZONE);
            let start = ctx.advance(0);
            put_on_demand(ctx.cache(), &key, start + offset, processed_count, None);

            ctx.sweep(ctx.zonal()).await.unwrap();
            let entry = ctx.get(Namespace::OnDemand, &key);

            if offset >= 0 {
                let entry = entry.expect("fresh entry is kept");
                assert_eq!(entry.attribute_i64("processedCount"), Some(processed_count + 1));
                assert_eq!(entry.attribute_i64("processedTime"), Some(start));
            } else if processed_count > 0 {
                assert!(entry.is_none(), "stale processed entry is evicted");
            } else {
                let entry = entry.expect("stale unprocessed entry survives once");
                assert_eq!(entry.attribute_i64("processedCount"), Some(1));
                assert_eq!(entry.attribute_i64("cacheTime"), Some(start + offset));
            }

            // Live data is always written for the existing group.
            assert!(ctx.get(Namespace::ServerGroups, &key).is_some());
        });
    }
}
