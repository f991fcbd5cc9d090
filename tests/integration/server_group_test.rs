// tests/integration/server_group_test.rs

//! Integration tests for server group assembly from provider records
//! Tests: build info, XPN networks, asg metadata, autoscalers, disks, ownership

use super::fixtures::*;
use serde_json::{Value, json};
use std::sync::Arc;
use topocache::agent::model::{
    AutoscalerStatusDetails, InstanceGroupManager, NamedPort, NetworkInterface,
};
use topocache::agent::server_group::{
    ServerGroup, ServerGroupAssembler, create_build_info, decorate_xpn_resource_id,
    load_balancer_names_from_target_pools, parse_timestamp, region_from_zone,
};
use topocache::core::clock::ManualClock;
use topocache::core::storage::ProviderCache;

fn new_cache() -> ProviderCache {
    ProviderCache::new(Arc::new(ManualClock::new(START_MILLIS)))
}

/// Assembles the single server group produced by `manager` with its `<name>-it` template.
fn assemble_one(
    manager: InstanceGroupManager,
    template_metadata: &[(&str, &str)],
    autoscalers: Vec<topocache::agent::model::Autoscaler>,
) -> ServerGroup {
    let cache = new_cache();
    let assembler = ServerGroupAssembler {
        account: ACCOUNT,
        project: PROJECT,
        cache: &cache,
    };
    let templates = vec![template(&manager.name, "myapp-image", template_metadata)];
    let instances = vec![
        instance(&format!("{}-abcd", manager.name), ZONE),
        instance(&format!("{}-wxyz", manager.name), OTHER_ZONE),
        instance("unrelated-v000-abcd", ZONE),
    ];
    let mut groups = assembler.assemble(&[manager], &instances, &templates, &autoscalers);
    assert_eq!(groups.len(), 1);
    groups.remove(0)
}

// ===== Build Info Tests =====

#[test]
fn test_build_info_with_jenkins_details() {
    let info = create_build_info(
        "appversion: myapp-1.0.0-12345.h777/999/10111,build_host: spin.nyc.corp,build_info_url: http://jenkins/artifact/12345",
    )
    .unwrap();

    assert_eq!(
        Value::Object(info),
        json!({
            "package_name": "myapp",
            "version": "1.0.0",
            "commit": "12345",
            "jenkins": { "name": "999", "number": "777", "host": "spin.nyc.corp" },
            "buildInfoUrl": "http://jenkins/artifact/12345",
        })
    );
}

#[test]
fn test_build_info_without_commit_or_job() {
    let info = create_build_info("appversion: myapp-1.0.0-h123").unwrap();
    assert_eq!(
        Value::Object(info),
        json!({ "package_name": "myapp", "version": "1.0.0" })
    );
}

#[test]
fn test_build_info_rejects_malformed_descriptions() {
    // No appversion tag.
    assert!(create_build_info("build_host: spin.nyc.corp").is_none());
    // A pair without the `: ` separator.
    assert!(create_build_info("appversion: myapp-1.0.0-h123,garbage").is_none());
    // Duplicate keys.
    assert!(create_build_info("appversion: myapp-1.0.0-h1,appversion: myapp-1.0.0-h2").is_none());
    // Unparseable appversion.
    assert!(create_build_info("appversion: !!!").is_none());
}

// ===== Network Tests =====

#[test]
fn test_xpn_network_in_managed_project_is_bare_name() {
    assert_eq!(
        decorate_xpn_resource_id(
            "myproject",
            "http://compute/network/projects/myproject/myNetworkName"
        ),
        "myNetworkName"
    );
}

#[test]
fn test_xpn_network_in_host_project_is_prefixed() {
    assert_eq!(
        decorate_xpn_resource_id(
            "someOtherProject",
            "http://compute/network/projects/myproject/myNetworkName"
        ),
        "myproject/myNetworkName"
    );
    assert_eq!(decorate_xpn_resource_id("myproject", "default"), "default");
}

#[test]
fn test_server_group_network_name_uses_template_interface() {
    let mut sg = assemble_one(zonal_manager("myapp-dev-v000", ZONE), &[], Vec::new());
    assert_eq!(sg.network_name.as_deref(), Some("default"));

    let cache = new_cache();
    let assembler = ServerGroupAssembler {
        account: ACCOUNT,
        project: PROJECT,
        cache: &cache,
    };
    let manager = zonal_manager("myapp-dev-v000", ZONE);
    let mut shared = template("myapp-dev-v000", "myapp-image", &[]);
    if let Some(properties) = shared.properties.as_mut() {
        properties.network_interfaces = vec![NetworkInterface {
            network: Some(
                "https://compute.googleapis.com/compute/v1/projects/host-project/global/networks/shared"
                    .to_string(),
            ),
        }];
    }
    sg = assembler.assemble(&[manager], &[], &[shared], &[]).remove(0);
    assert_eq!(sg.network_name.as_deref(), Some("host-project/shared"));
}

// ===== Autoscaling Group Metadata Tests =====

#[test]
fn test_load_balancing_policy_is_parsed() {
    let sg = assemble_one(
        zonal_manager("myapp-dev-v000", ZONE),
        &[("load-balancing-policy", r#"{"maxUtilization": 1.3}"#)],
        Vec::new(),
    );
    assert_eq!(
        sg.asg["load-balancing-policy"],
        json!({ "maxUtilization": 1.3 })
    );
}

#[test]
fn test_invalid_load_balancing_policy_is_omitted() {
    let sg = assemble_one(
        zonal_manager("myapp-dev-v000", ZONE),
        &[("load-balancing-policy", "{ not json")],
        Vec::new(),
    );
    assert!(sg.asg.get("load-balancing-policy").is_none());
    // The rest of the group is still assembled.
    assert_eq!(sg.asg["desiredCapacity"], json!(2));
}

#[test]
fn test_backend_service_metadata_is_split() {
    let sg = assemble_one(
        zonal_manager("myapp-dev-v000", ZONE),
        &[
            ("global-load-balancer-names", "glb-one,glb-two"),
            ("backend-service-names", " bs-one , bs-two "),
            ("region-backend-service-names", "rbs-one"),
        ],
        Vec::new(),
    );
    assert_eq!(sg.asg_names("global-load-balancer-names"), vec!["glb-one", "glb-two"]);
    assert_eq!(sg.asg_names("backend-service-names"), vec!["bs-one", "bs-two"]);
    assert_eq!(sg.asg_names("region-backend-service-names"), vec!["rbs-one"]);
    assert!(sg.asg_names("load-balancer-names").is_empty());
    // Without network load balancer names the group is never disabled.
    assert!(!sg.disabled);
}

#[test]
fn test_group_without_target_pools_is_disabled() {
    let sg = assemble_one(
        zonal_manager("myapp-dev-v000", ZONE),
        &[("load-balancer-names", "lb-one")],
        Vec::new(),
    );
    assert!(sg.disabled);
}

#[test]
fn test_group_with_target_pools_is_enabled() {
    let mut manager = zonal_manager("myapp-dev-v000", ZONE);
    manager.target_pools = vec![format!("{}/targetPools/lb-one-tp-1234", region_url(REGION))];
    let sg = assemble_one(manager, &[("load-balancer-names", "lb-one")], Vec::new());
    assert!(!sg.disabled);
}

#[test]
fn test_load_balancer_names_from_target_pools() {
    let pools = vec![
        format!("{}/targetPools/lb-one-tp-1234", region_url(REGION)),
        "lb-two-tp-99".to_string(),
        "plain-pool".to_string(),
    ];
    assert_eq!(
        load_balancer_names_from_target_pools(&pools),
        vec!["lb-one", "lb-two", "plain-pool"]
    );
}

#[test]
fn test_named_ports_skip_incomplete_entries() {
    let mut manager = zonal_manager("myapp-dev-v000", ZONE);
    manager.named_ports = Some(vec![
        NamedPort {
            name: Some("http".to_string()),
            port: Some(8080),
        },
        NamedPort {
            name: None,
            port: Some(9090),
        },
    ]);
    let sg = assemble_one(manager, &[], Vec::new());
    let attributes = sg.to_attributes().unwrap();
    assert_eq!(attributes["namedPorts"], json!({ "http": 8080 }));
}

// ===== Autoscaler Tests =====

#[test]
fn test_autoscaler_overrides_asg_bounds() {
    let manager = zonal_manager("myapp-dev-v000", ZONE);
    let autoscaler = autoscaler_for(&manager, 2, 10);
    let sg = assemble_one(manager, &[], vec![autoscaler]);

    assert_eq!(sg.asg["minSize"], json!(2));
    assert_eq!(sg.asg["maxSize"], json!(10));
    assert_eq!(sg.asg["desiredCapacity"], json!(2));
    let policy = sg.autoscaling_policy.unwrap();
    assert_eq!(policy.mode.as_deref(), Some("ON"));
}

#[test]
fn test_autoscaler_without_max_removes_bound() {
    let manager = zonal_manager("myapp-dev-v000", ZONE);
    let mut autoscaler = autoscaler_for(&manager, 1, 4);
    if let Some(policy) = autoscaler.autoscaling_policy.as_mut() {
        policy.max_num_replicas = None;
    }
    let sg = assemble_one(manager, &[], vec![autoscaler]);

    assert_eq!(sg.asg["minSize"], json!(1));
    assert!(sg.asg.get("maxSize").is_none());
}

#[test]
fn test_autoscaler_drops_unknown_enum_values() {
    let manager = zonal_manager("myapp-dev-v000", ZONE);
    let mut autoscaler = autoscaler_for(&manager, 1, 4);
    autoscaler.autoscaling_policy = serde_json::from_value(json!({
        "minNumReplicas": 1,
        "maxNumReplicas": 4,
        "mode": "SIDEWAYS",
        "cpuUtilization": { "utilizationTarget": 0.5, "predictiveMethod": "CRYSTAL_BALL" },
        "customMetricUtilizations": [
            { "metric": "qps", "utilizationTarget": 100.0, "utilizationTargetType": "BOGUS" },
            { "metric": "lag", "utilizationTarget": 5.0, "utilizationTargetType": "GAUGE" },
        ],
    }))
    .ok();
    autoscaler.status_details = Some(vec![
        AutoscalerStatusDetails {
            message: Some("at max size".to_string()),
        },
        AutoscalerStatusDetails { message: None },
    ]);
    let sg = assemble_one(manager, &[], vec![autoscaler]);

    let policy = sg.autoscaling_policy.unwrap();
    assert_eq!(policy.mode, None);
    let cpu = policy.cpu_utilization.unwrap();
    assert_eq!(cpu.predictive_method, None);
    assert_eq!(cpu.utilization_target, Some(0.5));
    let metrics = policy.custom_metric_utilizations.unwrap();
    assert_eq!(metrics[0].utilization_target_type, None);
    assert_eq!(metrics[1].utilization_target_type.as_deref(), Some("GAUGE"));
    assert_eq!(sg.autoscaling_messages, Some(vec!["at max size".to_string()]));
}

#[test]
fn test_autoscaler_in_other_zone_is_ignored() {
    let manager = zonal_manager("myapp-dev-v000", ZONE);
    let mut autoscaler = autoscaler_for(&manager, 3, 9);
    autoscaler.zone = Some(zone_url(OTHER_ZONE));
    let sg = assemble_one(manager, &[], vec![autoscaler]);

    assert!(sg.autoscaling_policy.is_none());
    assert_eq!(sg.asg["maxSize"], json!(2));
}

// ===== Region And Instance Tests =====

#[test]
fn test_region_from_zone() {
    assert_eq!(region_from_zone("us-central1-f"), "us-central1");
    assert_eq!(region_from_zone("europe-west4-a"), "europe-west4");
    assert_eq!(region_from_zone("nozone"), "nozone");
}

#[test]
fn test_zonal_group_owns_instances_in_its_zone_only() {
    let sg = assemble_one(zonal_manager("myapp-dev-v000", ZONE), &[], Vec::new());

    let names: Vec<&str> = sg.instances.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["myapp-dev-v000-abcd"]);
    assert_eq!(sg.zone.as_deref(), Some(ZONE));
    assert_eq!(sg.region, REGION);
    assert!(!sg.regional);

    let instance = &sg.instances[0];
    assert_eq!(instance.instance_type.as_deref(), Some("n1-standard-1"));
    assert_eq!(instance.launch_time, Some(1_714_590_300_000));
}

#[test]
fn test_regional_group_owns_instances_in_every_zone() {
    let sg = assemble_one(
        regional_manager("myapp-prod-v001", REGION, &[ZONE, OTHER_ZONE]),
        &[],
        Vec::new(),
    );

    let names: Vec<&str> = sg.instances.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["myapp-prod-v001-abcd", "myapp-prod-v001-wxyz"]);
    assert!(sg.regional);
    assert_eq!(sg.zone, None);
    assert_eq!(sg.region, REGION);
    assert_eq!(
        sg.zones.iter().map(String::as_str).collect::<Vec<_>>(),
        vec![ZONE, OTHER_ZONE]
    );
}

// ===== Launch Config Tests =====

#[test]
fn test_launch_config_describes_template() {
    let sg = assemble_one(zonal_manager("myapp-dev-v000", ZONE), &[], Vec::new());

    assert_eq!(sg.launch_config["createdTime"], json!(1_714_590_000_000i64));
    assert_eq!(
        sg.launch_config["launchConfigurationName"],
        json!("myapp-dev-v000-it")
    );
    assert_eq!(sg.launch_config["instanceType"], json!("n1-standard-1"));
    assert_eq!(sg.launch_config["imageId"], json!("myapp-image"));
    assert_eq!(
        sg.launch_config["instanceTemplate"]["name"],
        json!("myapp-dev-v000-it")
    );
    assert_eq!(parse_timestamp("yesterday"), None);
}

#[test]
fn test_image_comes_from_normalized_boot_disk() {
    let cache = new_cache();
    let assembler = ServerGroupAssembler {
        account: ACCOUNT,
        project: PROJECT,
        cache: &cache,
    };
    let manager = zonal_manager("myapp-dev-v000", ZONE);

    let mut boot_second = template("myapp-dev-v000", "unused", &[]);
    if let Some(properties) = boot_second.properties.as_mut() {
        properties.disks = vec![disk("data", false, true), disk("root", true, true)];
    }
    let sg = assembler
        .assemble(std::slice::from_ref(&manager), &[], &[boot_second], &[])
        .remove(0);
    assert_eq!(sg.launch_config["imageId"], json!("root-image"));
    let disks = &sg.launch_config["instanceTemplate"]["properties"]["disks"];
    assert_eq!(disks[0]["deviceName"], json!("root"));
    assert_eq!(disks[1]["deviceName"], json!("data"));

    let mut no_boot = template("myapp-dev-v000", "unused", &[]);
    if let Some(properties) = no_boot.properties.as_mut() {
        properties.disks = vec![disk("data", false, true)];
    }
    let sg = assembler
        .assemble(&[manager], &[], &[no_boot], &[])
        .remove(0);
    assert!(sg.launch_config.get("imageId").is_none());
    assert!(sg.build_info.is_none());
}
