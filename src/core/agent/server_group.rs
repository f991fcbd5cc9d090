// src/core/agent/server_group.rs

//! Assembles the cached server group view from raw provider records.

use super::disks::normalize_disks;
use super::model::{
    AttachedDisk, Autoscaler, AutoscalingPolicy, Instance, InstanceGroupManager,
    InstanceTemplate, local_name,
};
use super::naming::AppVersion;
use crate::core::errors::CacheError;
use crate::core::keys::{Namespace, ResourceKey};
use crate::core::storage::{Attributes, ProviderCache};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tracing::warn;

pub const REGIONAL_LOAD_BALANCER_NAMES: &str = "load-balancer-names";
pub const GLOBAL_LOAD_BALANCER_NAMES: &str = "global-load-balancer-names";
pub const BACKEND_SERVICE_NAMES: &str = "backend-service-names";
pub const REGION_BACKEND_SERVICE_NAMES: &str = "region-backend-service-names";
pub const LOAD_BALANCING_POLICY: &str = "load-balancing-policy";

/// Target pools created for a network load balancer are named `<lb>-tp-<suffix>`.
const TARGET_POOL_NAME_MARKER: &str = "-tp-";

/// The cached view of one managed instance group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerGroup {
    pub name: String,
    pub account: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default)]
    pub zones: IndexSet<String>,
    #[serde(default)]
    pub regional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_policy: Option<ServerGroupDistributionPolicy>,
    #[serde(default)]
    pub instances: Vec<ServerGroupInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_ports: Option<IndexMap<String, i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_actions: Option<Value>,
    #[serde(default)]
    pub launch_config: Map<String, Value>,
    #[serde(default)]
    pub asg: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_info: Option<Map<String, Value>>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling_policy: Option<AutoscalingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling_messages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_ip_forward: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_template_tags: Option<IndexSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_template_labels: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_template_service_accounts: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful_policy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_healing_policy: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerGroupDistributionPolicy {
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_shape: Option<String>,
}

/// The per-instance summary embedded in a server group and cached under `instances`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerGroupInstance {
    pub name: String,
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub labels: IndexMap<String, String>,
}

impl From<&Instance> for ServerGroupInstance {
    fn from(instance: &Instance) -> Self {
        Self {
            name: instance.name.clone(),
            zone: instance.zone_name().to_string(),
            status: instance.status.clone(),
            instance_type: instance.machine_type.as_deref().map(|m| local_name(m).to_string()),
            launch_time: instance.creation_timestamp.as_deref().and_then(parse_timestamp),
            self_link: instance.self_link.clone(),
            labels: instance.labels.clone(),
        }
    }
}

impl ServerGroup {
    /// Serializes the server group into a cache attribute map.
    pub fn to_attributes(&self) -> Result<Attributes, CacheError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CacheError::Serialization(format!(
                "server group '{}' serialized to a non-object: {other}",
                self.name
            ))),
        }
    }

    /// Names listed in a comma-split asg metadata entry.
    pub fn asg_names(&self, key: &str) -> Vec<String> {
        self.asg
            .get(key)
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The account-level context needed to assemble server groups.
pub struct ServerGroupAssembler<'a> {
    pub account: &'a str,
    pub project: &'a str,
    /// Used to read cached image descriptions for build info.
    pub cache: &'a ProviderCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TargetAndScope {
    target: String,
    region: Option<String>,
    zone: Option<String>,
}

impl TargetAndScope {
    fn for_autoscaler(autoscaler: &Autoscaler) -> Self {
        Self {
            target: local_name(&autoscaler.target).to_string(),
            region: autoscaler.region.as_deref().map(|r| local_name(r).to_string()),
            zone: autoscaler.zone.as_deref().map(|z| local_name(z).to_string()),
        }
    }

    fn for_manager(manager: &InstanceGroupManager) -> Self {
        Self {
            target: manager.name.clone(),
            region: manager.region_name().map(str::to_string),
            zone: manager.zone_name().map(str::to_string),
        }
    }
}

impl ServerGroupAssembler<'_> {
    /// Joins managers with their instances, templates and autoscalers.
    pub fn assemble(
        &self,
        managers: &[InstanceGroupManager],
        instances: &[Instance],
        templates: &[InstanceTemplate],
        autoscalers: &[Autoscaler],
    ) -> Vec<ServerGroup> {
        let autoscaler_map: HashMap<TargetAndScope, &Autoscaler> = autoscalers
            .iter()
            .map(|a| (TargetAndScope::for_autoscaler(a), a))
            .collect();
        let template_map: HashMap<&str, &InstanceTemplate> =
            templates.iter().map(|t| (t.name.as_str(), t)).collect();

        managers
            .iter()
            .map(|manager| {
                let owned: Vec<&Instance> = match manager.base_instance_name.as_deref() {
                    Some(base) => instances
                        .iter()
                        .filter(|i| i.name.starts_with(base))
                        .filter(|i| instance_scoped_to_manager(i, manager))
                        .collect(),
                    None => Vec::new(),
                };
                let autoscaler = autoscaler_map
                    .get(&TargetAndScope::for_manager(manager))
                    .copied();
                let template = manager
                    .instance_template
                    .as_deref()
                    .and_then(|url| template_map.get(local_name(url)).copied());
                self.create_server_group(manager, &owned, template, autoscaler)
            })
            .collect()
    }

    fn create_server_group(
        &self,
        manager: &InstanceGroupManager,
        instances: &[&Instance],
        template: Option<&InstanceTemplate>,
        autoscaler: Option<&Autoscaler>,
    ) -> ServerGroup {
        let mut server_group = ServerGroup {
            name: manager.name.clone(),
            account: self.account.to_string(),
            instances: instances.iter().map(|i| ServerGroupInstance::from(*i)).collect(),
            named_ports: convert_named_ports(manager),
            self_link: manager.self_link.clone(),
            current_actions: manager.current_actions.clone(),
            ..Default::default()
        };
        set_region_config(&mut server_group, manager);
        self.set_launch_config(&mut server_group, manager, template);
        set_autoscaler_group(&mut server_group, manager, template);

        if let Some(properties) = template.and_then(|t| t.properties.as_ref()) {
            server_group.can_ip_forward = properties.can_ip_forward;
            server_group.instance_template_service_accounts = properties.service_accounts.clone();
            server_group.instance_template_tags = properties
                .tags
                .as_ref()
                .and_then(|tags| tags.items.as_ref())
                .map(|items| items.iter().cloned().collect());
            server_group.instance_template_labels = properties.labels.clone();
            if let Some(network) = properties
                .network_interfaces
                .first()
                .and_then(|nic| nic.network.as_deref())
            {
                server_group.network_name =
                    Some(decorate_xpn_resource_id(self.project, network));
            }
        }

        server_group.stateful_policy = manager.stateful_policy.clone();
        server_group.auto_healing_policy = manager.auto_healing_policies.first().cloned();
        populate_autoscaler(&mut server_group, autoscaler);
        server_group
    }

    fn set_launch_config(
        &self,
        server_group: &mut ServerGroup,
        manager: &InstanceGroupManager,
        template: Option<&InstanceTemplate>,
    ) {
        let mut launch_config = Map::new();
        if let Some(created) = manager.creation_timestamp.as_deref().and_then(parse_timestamp) {
            launch_config.insert("createdTime".into(), json!(created));
        }

        if let Some(template) = template {
            let mut template = template.clone();
            launch_config.insert("launchConfigurationName".into(), json!(template.name));
            let mut disks = Vec::new();
            if let Some(properties) = template.properties.as_mut() {
                disks = normalize_disks(std::mem::take(&mut properties.disks));
                properties.disks = disks.clone();
                if let Some(machine_type) = &properties.machine_type {
                    launch_config.insert("instanceType".into(), json!(machine_type));
                }
                if let Some(platform) = &properties.min_cpu_platform {
                    launch_config.insert("minCpuPlatform".into(), json!(platform));
                }
            }
            match serde_json::to_value(&template) {
                Ok(value) => {
                    launch_config.insert("instanceTemplate".into(), value);
                }
                Err(e) => warn!("Failed to serialize instance template '{}': {}", template.name, e),
            }
            self.set_source_image(server_group, &mut launch_config, &disks);
        }
        server_group.launch_config = launch_config;
    }

    fn set_source_image(
        &self,
        server_group: &mut ServerGroup,
        launch_config: &mut Map<String, Value>,
        disks: &[AttachedDisk],
    ) {
        // Disks were normalized so the boot disk, if any, comes first.
        let Some(first) = disks.first().filter(|disk| disk.boot) else {
            return;
        };
        let Some(source_image) = first
            .initialize_params
            .as_ref()
            .and_then(|params| params.source_image.as_deref())
        else {
            return;
        };

        let image_name = local_name(source_image);
        launch_config.insert("imageId".into(), json!(image_name));

        let image_key = ResourceKey::image(self.account, image_name).encode();
        if let Some(image) = self.cache.get(Namespace::Images, &image_key) {
            let description = image
                .attributes
                .get("image")
                .and_then(|img| img.get("description"))
                .and_then(Value::as_str);
            server_group.build_info = description.and_then(create_build_info);
        }
    }
}

fn instance_scoped_to_manager(instance: &Instance, manager: &InstanceGroupManager) -> bool {
    match manager.zone_name() {
        // Regional managers own instances in every zone of their region.
        None => true,
        Some(zone) => zone == instance.zone_name(),
    }
}

fn set_region_config(server_group: &mut ServerGroup, manager: &InstanceGroupManager) {
    match manager.zone_name() {
        None => {
            server_group.regional = true;
            server_group.region = manager.region_name().unwrap_or_default().to_string();
            let policy = manager.distribution_policy.as_ref();
            let zones: Vec<String> = policy
                .map(|p| {
                    p.zones
                        .iter()
                        .map(|z| local_name(&z.zone).to_string())
                        .collect()
                })
                .unwrap_or_default();
            server_group.zones = zones.iter().cloned().collect();
            server_group.distribution_policy = Some(ServerGroupDistributionPolicy {
                zones,
                target_shape: policy.and_then(|p| p.target_shape.clone()),
            });
        }
        Some(zone) => {
            server_group.regional = false;
            server_group.zone = Some(zone.to_string());
            server_group.zones = IndexSet::from([zone.to_string()]);
            server_group.region = region_from_zone(zone).to_string();
        }
    }
}

/// `us-central1-a` belongs to `us-central1`.
pub fn region_from_zone(zone: &str) -> &str {
    zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone)
}

fn convert_named_ports(manager: &InstanceGroupManager) -> Option<IndexMap<String, i64>> {
    manager.named_ports.as_ref().map(|ports| {
        ports
            .iter()
            .filter_map(|p| Some((p.name.clone()?, p.port?)))
            .collect()
    })
}

fn set_autoscaler_group(
    server_group: &mut ServerGroup,
    manager: &InstanceGroupManager,
    template: Option<&InstanceTemplate>,
) {
    let mut asg = Map::new();
    if let Some(size) = manager.target_size {
        asg.insert("minSize".into(), json!(size));
        asg.insert("maxSize".into(), json!(size));
        asg.insert("desiredCapacity".into(), json!(size));
    }

    let metadata: HashMap<&str, &str> = template
        .and_then(|t| t.properties.as_ref())
        .and_then(|p| p.metadata.as_ref())
        .map(|m| {
            m.items
                .iter()
                .filter_map(|item| Some((item.key.as_deref()?, item.value.as_deref()?)))
                .collect()
        })
        .unwrap_or_default();

    for key in [
        GLOBAL_LOAD_BALANCER_NAMES,
        REGIONAL_LOAD_BALANCER_NAMES,
        BACKEND_SERVICE_NAMES,
        REGION_BACKEND_SERVICE_NAMES,
    ] {
        if let Some(value) = metadata.get(key) {
            asg.insert(key.into(), json!(split_comma(value)));
        }
    }

    if metadata.contains_key(REGIONAL_LOAD_BALANCER_NAMES) {
        // Network load balancers attach through target pools; no pools means traffic is off.
        let attached = load_balancer_names_from_target_pools(&manager.target_pools);
        server_group.disabled = attached.is_empty();
    }

    if let Some(policy) = metadata.get(LOAD_BALANCING_POLICY) {
        match serde_json::from_str::<Value>(policy) {
            Ok(parsed @ Value::Object(_)) => {
                asg.insert(LOAD_BALANCING_POLICY.into(), parsed);
            }
            Ok(_) => warn!(
                "Load balancing policy for '{}' is not an object; ignoring.",
                server_group.name
            ),
            Err(e) => warn!(
                "Error parsing load balancing policy for '{}': {}",
                server_group.name, e
            ),
        }
    }

    server_group.asg = asg;
}

fn populate_autoscaler(server_group: &mut ServerGroup, autoscaler: Option<&Autoscaler>) {
    let Some(autoscaler) = autoscaler else {
        return;
    };

    if let Some(policy) = &autoscaler.autoscaling_policy {
        let policy = sanitize_autoscaling_policy(policy.clone());
        for (key, bound) in [
            ("minSize", policy.min_num_replicas),
            ("maxSize", policy.max_num_replicas),
        ] {
            match bound {
                Some(value) => {
                    server_group.asg.insert(key.into(), json!(value));
                }
                None => {
                    server_group.asg.remove(key);
                }
            }
        }
        server_group.autoscaling_policy = Some(policy);
    }

    if let Some(details) = &autoscaler.status_details {
        server_group.autoscaling_messages = Some(
            details
                .iter()
                .filter_map(|detail| detail.message.clone())
                .collect(),
        );
    }
}

/// Drops enum-valued fields the provider reported with values we do not recognize.
fn sanitize_autoscaling_policy(mut policy: AutoscalingPolicy) -> AutoscalingPolicy {
    const MODES: &[&str] = &["OFF", "ON", "ONLY_SCALE_OUT", "ONLY_UP"];
    const PREDICTIVE_METHODS: &[&str] = &["NONE", "OPTIMIZE_AVAILABILITY"];
    const TARGET_TYPES: &[&str] = &["GAUGE", "DELTA_PER_SECOND", "DELTA_PER_MINUTE"];

    let known = |value: &mut Option<String>, allowed: &[&str]| {
        if value.as_deref().is_some_and(|v| !allowed.contains(&v)) {
            *value = None;
        }
    };

    known(&mut policy.mode, MODES);
    if let Some(cpu) = policy.cpu_utilization.as_mut() {
        known(&mut cpu.predictive_method, PREDICTIVE_METHODS);
    }
    if let Some(metrics) = policy.custom_metric_utilizations.as_mut() {
        for metric in metrics {
            known(&mut metric.utilization_target_type, TARGET_TYPES);
        }
    }
    policy
}

fn split_comma(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Derives network load balancer names from target pool URLs.
pub fn load_balancer_names_from_target_pools(target_pools: &[String]) -> Vec<String> {
    target_pools
        .iter()
        .map(|url| {
            let name = local_name(url);
            name.split(TARGET_POOL_NAME_MARKER)
                .next()
                .unwrap_or(name)
                .to_string()
        })
        .collect()
}

/// Returns the network's local name, prefixed with its project when it
/// belongs to a different (shared VPC host) project.
pub fn decorate_xpn_resource_id(managed_project: &str, resource_url: &str) -> String {
    let name = local_name(resource_url);
    let mut segments = resource_url.split('/');
    let owner = segments
        .by_ref()
        .find(|segment| *segment == "projects")
        .and_then(|_| segments.next());
    match owner {
        Some(project) if project != managed_project => format!("{project}/{name}"),
        _ => name.to_string(),
    }
}

/// Parses a comma separated `key: value` image description and extracts build info.
pub fn create_build_info(description: &str) -> Option<Map<String, Value>> {
    let mut tags: HashMap<&str, &str> = HashMap::new();
    for pair in description.split(',') {
        let (key, value) = pair.split_once(": ")?;
        if tags.insert(key.trim(), value.trim()).is_some() {
            return None;
        }
    }

    let app_version = AppVersion::parse(tags.get("appversion")?)?;

    let mut build_info = Map::new();
    build_info.insert("package_name".into(), json!(app_version.package_name));
    build_info.insert("version".into(), json!(app_version.version));
    if let Some(commit) = &app_version.commit {
        build_info.insert("commit".into(), json!(commit));
    }
    if let Some(job) = &app_version.build_job_name {
        let mut jenkins = Map::new();
        jenkins.insert("name".into(), json!(job));
        if let Some(number) = &app_version.build_number {
            jenkins.insert("number".into(), json!(number));
        }
        if let Some(host) = tags.get("build_host") {
            jenkins.insert("host".into(), json!(host));
        }
        build_info.insert("jenkins".into(), Value::Object(jenkins));
    }
    if let Some(url) = tags.get("build_info_url") {
        build_info.insert("buildInfoUrl".into(), json!(url));
    }
    Some(build_info)
}

/// Parses an RFC 3339 provider timestamp into epoch millis.
pub fn parse_timestamp(timestamp: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
