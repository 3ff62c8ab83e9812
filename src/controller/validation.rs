//! Validation of a CephDeployment spec.
//!
//! Validation is a pure function of the spec and the expanded node list; it
//! runs on every pass and never stops at the first problem, so the status
//! lists every message at once.

use tracing::error;

use crate::crd::{
    CephDeploymentNode, CephDeploymentSpec, CephFsSpec, ExtraOpts, ObjectStorageSpec, PoolSpec,
    ValidationResult, ValidationStatus,
};

/// Device classes every cluster knows about.
pub const DEVICE_CLASSES: [&str; 3] = ["hdd", "ssd", "nvme"];

const RECLAIM_POLICIES: [&str; 2] = ["Retain", "Delete"];
const OSD_FAILURE_DOMAIN: &str = "osd";
const PROHIBITED_NETWORK: &str = "0.0.0.0/0";

fn valid_device_class(class: &str, extra_opts: Option<&ExtraOpts>) -> bool {
    DEVICE_CLASSES.contains(&class)
        || extra_opts.is_some_and(|o| o.custom_device_classes.iter().any(|c| c == class))
}

/// Validate the spec against the expanded node list.
pub fn validate(
    spec: &CephDeploymentSpec,
    nodes: &[CephDeploymentNode],
    generation: i64,
    rook_namespace: &str,
) -> ValidationStatus {
    let mut messages = Vec::new();
    validate_pools(spec, nodes, &mut messages);
    if !spec.external {
        validate_nodes(spec, nodes, &mut messages);
        validate_network(spec, &mut messages);
    }
    if let Some(object_storage) = spec.object_storage.as_ref() {
        validate_object_storage(object_storage, spec.external, &mut messages);
    }
    if let Some(shared_filesystem) = spec.shared_filesystem.as_ref() {
        for fs in &shared_filesystem.ceph_fs {
            validate_ceph_fs(fs, spec, nodes, rook_namespace, &mut messages);
        }
    }

    for message in &messages {
        error!(generation, "{message}");
    }
    let result = if messages.is_empty() {
        ValidationResult::Succeed
    } else {
        ValidationResult::Failed
    };
    ValidationStatus {
        result: Some(result),
        last_validated_generation: generation,
        messages,
    }
}

fn validate_pools(spec: &CephDeploymentSpec, nodes: &[CephDeploymentNode], messages: &mut Vec<String>) {
    let extra_opts = spec.extra_opts.as_ref();
    let mut default_found = false;
    for pool in &spec.pools {
        let opts = pool.storage_class_opts.as_ref();
        let is_default = opts.is_some_and(|o| o.default);
        if default_found && is_default {
            messages.push("CephDeployment has multiple default pools specified".to_string());
        }
        default_found |= is_default;

        if !valid_device_class(&pool.device_class, extra_opts) {
            messages.push(format!(
                "invalid deviceClass '{}' for pool {}",
                pool.device_class, pool.name
            ));
        }
        if !spec.external && pool.replicated.is_some() == pool.erasure_coded.is_some() {
            messages.push(format!(
                "CephDeployment pool {} spec should contain either replicated or erasureCoded spec",
                pool.name
            ));
        }
        if let Some(policy) = opts.and_then(|o| o.reclaim_policy.as_deref())
            && !policy.is_empty()
            && !RECLAIM_POLICIES.contains(&policy)
        {
            messages.push(format!(
                "CephDeployment pool {} has invalid reclaimPolicy '{policy}', supported: {}",
                pool.name,
                RECLAIM_POLICIES.join(", ")
            ));
        }
        if pool.failure_domain.as_deref() == Some(OSD_FAILURE_DOMAIN) && nodes.len() > 1 {
            messages.push(format!(
                "CephDeployment pool {} has 'osd' failureDomain, which is not allowed for multinode deployment",
                pool.name
            ));
        }
    }
    if !default_found && !spec.external && !spec.pools.is_empty() {
        messages.push("CephDeployment has no default pool specified".to_string());
    }
}

fn validate_nodes(spec: &CephDeploymentSpec, nodes: &[CephDeploymentNode], messages: &mut Vec<String>) {
    let extra_opts = spec.extra_opts.as_ref();
    for node in &spec.nodes {
        if node.use_all_devices {
            messages.push(format!(
                "detected using 'useAllDevices' for '{}' node item, which is not supported",
                node.name
            ));
            continue;
        }
        let node_type = if node.nodes_by_label.is_some() || !node.node_group.is_empty() {
            "nodeGroup"
        } else {
            "node"
        };
        let node_class = node.config.get("deviceClass").filter(|c| !c.is_empty());
        if let Some(class) = node_class
            && !valid_device_class(class, extra_opts)
        {
            messages.push(format!(
                "{node_type} config '{}' has invalid deviceClass '{class}'",
                node.name
            ));
        }
        if let Some(value) = node.config.get("osdsPerDevice")
            && value.parse::<u32>().is_err()
        {
            messages.push(format!(
                "failed to parse config parameter 'osdsPerDevice' for {node_type} '{}': '{value}'",
                node.name
            ));
        }
        if !node.is_osd_node() {
            continue;
        }
        if node.devices.is_empty() && node_class.is_none() {
            messages.push(format!(
                "deviceClass is not specified for '{}' node item, but it is required",
                node.name
            ));
        }
        for device in &node.devices {
            let class = device.config.get("deviceClass").filter(|c| !c.is_empty());
            let Some(class) = class.or(node_class) else {
                messages.push(format!(
                    "device '{}' on {node_type} '{}' has no deviceClass specified",
                    device.full_path.as_deref().unwrap_or(&device.name),
                    node.name
                ));
                continue;
            };
            if !valid_device_class(class, extra_opts) {
                messages.push(format!(
                    "device '{}' on {node_type} '{}' has invalid deviceClass '{class}'",
                    device.full_path.as_deref().unwrap_or(&device.name),
                    node.name
                ));
            }
        }
    }

    let count = |role: &str| nodes.iter().filter(|n| n.roles.iter().any(|r| r == role)).count();
    let mons = count("mon");
    if nodes.len() >= 3 && mons % 2 == 0 {
        messages.push(format!(
            "CephDeployment monitors (roles 'mon') count {mons} is even, but should be odd for a healthy quorum"
        ));
    }
    if count("mgr") == 0 {
        messages.push("no 'mgr' roles specified, required at least one".to_string());
    }
}

fn validate_network(spec: &CephDeploymentSpec, messages: &mut Vec<String>) {
    let nets = [
        ("publicNet", spec.network.public_net.as_str()),
        ("clusterNet", spec.network.cluster_net.as_str()),
    ];
    for (param, value) in nets {
        for range in value.split(',').map(str::trim) {
            if range.is_empty() {
                messages.push(format!("network {param} parameter is empty"));
            } else if range == PROHIBITED_NETWORK {
                messages.push(format!("network {param} parameter contains prohibited 0.0.0.0 range"));
            }
        }
    }
}

fn validate_object_storage(object_storage: &ObjectStorageSpec, external: bool, messages: &mut Vec<String>) {
    let rgw = &object_storage.rgw;
    if external {
        if rgw.metadata_pool.is_some() || rgw.data_pool.is_some() {
            messages.push("rgw in external mode, pools (metadata and data) specification is not allowed".to_string());
        }
        return;
    }
    let zone = rgw.zone.as_ref().map(|z| z.name.as_str()).filter(|z| !z.is_empty());
    let Some(multisite) = object_storage.multi_site.as_ref() else {
        if zone.is_some() {
            messages.push(
                "rgw has specified zone name, but it is allowed only for multisite configuration, which is not present"
                    .to_string(),
            );
        } else if rgw.metadata_pool.is_none() || rgw.data_pool.is_none() {
            messages.push("no rgw metadata/data pool(s) specified".to_string());
        }
        return;
    };

    if multisite.realms.is_empty() {
        messages.push("incorrect multisite configuration, no realms specified".to_string());
    }
    for zone_group in &multisite.zone_groups {
        if !multisite.realms.iter().any(|r| r.name == zone_group.realm_name) {
            messages.push(format!(
                "incorrect multisite configuration, specified realm '{}' is not found",
                zone_group.realm_name
            ));
        }
    }
    for ms_zone in &multisite.zones {
        if !multisite.zone_groups.iter().any(|zg| zg.name == ms_zone.zone_group_name) {
            messages.push(format!(
                "incorrect multisite configuration, specified zonegroup '{}' is not found",
                ms_zone.zone_group_name
            ));
        }
    }
    match zone {
        None => messages.push("rgw has no specified zone name, but multisite configuration is present".to_string()),
        Some(zone) if !multisite.zones.iter().any(|z| z.name == zone) => messages.push(format!(
            "incorrect multisite configuration, specified zone '{zone}' is not found"
        )),
        Some(_) => {}
    }
}

fn validate_ceph_fs(
    fs: &CephFsSpec,
    spec: &CephDeploymentSpec,
    nodes: &[CephDeploymentNode],
    rook_namespace: &str,
    messages: &mut Vec<String>,
) {
    let extra_opts = spec.extra_opts.as_ref();
    let fs_name = format!("{rook_namespace}/{}", fs.name);
    let osd_domain = |pool: &PoolSpec| pool.failure_domain.as_deref() == Some(OSD_FAILURE_DOMAIN) && nodes.len() > 1;

    let metadata = &fs.metadata_pool;
    if metadata.replicated.is_none() || metadata.erasure_coded.is_some() {
        messages.push(format!("metadataPool for CephFS {fs_name} must use replication only"));
    }
    if fs.data_pools.is_empty() {
        messages.push(format!("dataPools sections for CephFS {fs_name} has no data pools defined"));
        return;
    }
    if !valid_device_class(&metadata.device_class, extra_opts) {
        messages.push(format!(
            "metadataPool for CephFS {fs_name} has invalid deviceClass '{}'",
            metadata.device_class
        ));
    }
    if osd_domain(metadata) {
        messages.push(format!("metadataPool for CephFS {fs_name} contains prohibited 'osd' failureDomain"));
    }
    for (idx, data_pool) in fs.data_pools.iter().enumerate() {
        let pool = &data_pool.pool;
        if !valid_device_class(&pool.device_class, extra_opts) {
            messages.push(format!(
                "dataPool {} for CephFS {fs_name} has invalid deviceClass '{}'",
                data_pool.name, pool.device_class
            ));
        }
        if osd_domain(pool) {
            messages.push(format!(
                "dataPool {} for CephFS {fs_name} contains prohibited 'osd' failureDomain",
                data_pool.name
            ));
        }
        if idx == 0 {
            if pool.erasure_coded.is_some() || pool.replicated.is_none() {
                messages.push(format!(
                    "dataPool {} will be used as default for CephFS {fs_name} and must use replication only",
                    data_pool.name
                ));
            }
        } else if pool.replicated.is_none() && pool.erasure_coded.is_none() {
            messages.push(format!(
                "dataPool {} for CephFS {fs_name} has neither replicated nor erasureCoded section specified",
                data_pool.name
            ));
        }
    }

    if !spec.external {
        let mds = nodes.iter().filter(|n| n.roles.iter().any(|r| r == "mds")).count();
        let required = usize::try_from(fs.metadata_server.active_count).unwrap_or_default();
        if required > mds {
            messages.push(format!(
                "not enough 'mds' roles specified in nodes spec, CephFS {fs_name} requires at least {required}"
            ));
        }
    }
}
