//! Node list expansion and the node label/annotation steps.
//!
//! The spec node list may describe groups of nodes (`nodeGroup`) or select
//! them by label (`nodesByLabel`). [`expand_nodes`] turns it into one entry
//! per Kubernetes node, which every later step works on.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, error, info};

use crate::controller::differ::StepOutcome;
use crate::controller::pass::PassContext;
use crate::crd::{CephDeploymentNode, CephDeploymentSpec, NodeDevice};
use crate::resources::common::{
    CEPH_DAEMONS, CRUSH_TOPOLOGY_KEYS, DAEMONSET_NODE_LABEL, MON_IP_ANNOTATION,
    crush_topology_label, node_role_label,
};
use crate::store::ObjectStore;

/// Prefix of the label remembering a kubernetes topology value we replaced.
pub const PREVIOUS_TOPOLOGY_PREFIX: &str = "cephdpl-prev-";

const BY_PATH_PREFIX: &str = "/dev/disk/by-path/";
const METADATA_DEVICE: &str = "metadataDevice";
const KUBE_TOPOLOGY_PREFIX: &str = "topology.kubernetes.io/";

/// Replace device labels by the real device of one node.
fn expand_devices(devices: &mut [NodeDevice], device_labels: Option<&BTreeMap<String, String>>) {
    let Some(device_labels) = device_labels.filter(|l| !l.is_empty()) else {
        return;
    };
    for device in devices {
        if let Some(link) = device_labels.get(&device.name) {
            if link.starts_with(BY_PATH_PREFIX) {
                device.name = String::new();
                device.full_path = Some(link.clone());
            } else {
                device.name = link.clone();
                device.full_path = None;
            }
        }
        if let Some(link) = device
            .config
            .get(METADATA_DEVICE)
            .and_then(|label| device_labels.get(label))
            .cloned()
        {
            device.config.insert(METADATA_DEVICE.to_string(), link);
        }
    }
}

fn expanded(template: &CephDeploymentNode, name: &str, spec: &CephDeploymentSpec) -> CephDeploymentNode {
    let mut node = template.clone();
    node.name = name.to_string();
    node.node_group = Vec::new();
    let device_labels = spec
        .extra_opts
        .as_ref()
        .and_then(|o| o.device_labels.get(name));
    expand_devices(&mut node.devices, device_labels);
    node
}

/// One entry per Kubernetes node, with device labels resolved.
pub async fn expand_nodes(
    spec: &CephDeploymentSpec,
    nodes: &dyn ObjectStore<Node>,
) -> std::result::Result<Vec<CephDeploymentNode>, String> {
    let mut list = Vec::new();
    for (idx, node) in spec.nodes.iter().enumerate() {
        if node.name.is_empty() {
            return Err(format!("name missed for node (group) item #{idx}"));
        }
        let by_label = node.nodes_by_label.as_deref().filter(|s| !s.is_empty());
        if !node.node_group.is_empty() && by_label.is_some() {
            return Err(format!(
                "labels and node groups used simultaneously for node (group) {}",
                node.name
            ));
        }
        if !node.node_group.is_empty() {
            list.extend(node.node_group.iter().map(|member| expanded(node, member, spec)));
        } else if let Some(selector) = by_label {
            let selected = nodes
                .list(Some(selector))
                .await
                .map_err(|e| format!("failed to get nodes with label: {selector}: {e}"))?;
            list.extend(selected.iter().map(|n| expanded(node, &n.name_any(), spec)));
        } else {
            list.push(expanded(node, &node.name, spec));
        }
    }
    Ok(list)
}

fn set_label(labels: &mut BTreeMap<String, String>, key: &str, value: &str) -> bool {
    if labels.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    labels.insert(key.to_string(), value.to_string());
    true
}

/// Role labels: `true` for every role in `roles`, absent otherwise.
fn sync_role_labels(labels: &mut BTreeMap<String, String>, roles: &BTreeSet<&str>) -> bool {
    let mut changed = false;
    for daemon in CEPH_DAEMONS {
        let key = node_role_label(daemon);
        if roles.contains(daemon) {
            changed |= set_label(labels, &key, "true");
        } else {
            changed |= labels.remove(&key).is_some();
        }
    }
    changed
}

/// Crush topology labels for `crush`.
///
/// Kubernetes topology labels may already be set by the platform. The value
/// found before ours is kept in `cephdpl-prev-<label>` and put back once the
/// crush key leaves the spec.
fn sync_topology_labels(labels: &mut BTreeMap<String, String>, node: &str, crush: &BTreeMap<String, String>) -> bool {
    let mut changed = false;
    for (key, value) in crush.iter().filter(|(_, v)| !v.is_empty()) {
        let Some(label) = crush_topology_label(key) else {
            error!(node = %node, key = %key, "Invalid crush topology key, ignoring");
            continue;
        };
        let previous = format!("{PREVIOUS_TOPOLOGY_PREFIX}{label}");
        let kube = label.starts_with(KUBE_TOPOLOGY_PREFIX);
        if kube && !labels.contains_key(&previous) {
            let original = labels.get(label).cloned().unwrap_or_else(|| value.clone());
            labels.insert(previous, original);
            changed = true;
        }
        if set_label(labels, label, value) {
            info!(node = %node, label = %label, value = %value, "Setting crush topology label");
            changed = true;
        }
    }

    for key in CRUSH_TOPOLOGY_KEYS {
        if crush.get(key).is_some_and(|v| !v.is_empty()) {
            continue;
        }
        let Some(label) = crush_topology_label(key) else {
            continue;
        };
        if !label.starts_with(KUBE_TOPOLOGY_PREFIX) {
            changed |= labels.remove(label).is_some();
            continue;
        }
        let previous = format!("{PREVIOUS_TOPOLOGY_PREFIX}{label}");
        let Some(original) = labels.remove(&previous) else {
            continue;
        };
        changed = true;
        if labels.get(label).is_some_and(|actual| *actual != original) {
            labels.insert(label.to_string(), original);
        } else {
            labels.remove(label);
        }
    }
    changed
}

/// Roles and crush labels wanted on a node; nothing for nodes outside the spec.
fn wanted_labels(node: Option<&CephDeploymentNode>) -> (BTreeSet<&str>, BTreeMap<String, String>) {
    let Some(node) = node else {
        return (BTreeSet::new(), BTreeMap::new());
    };
    let mut roles: BTreeSet<&str> = node.roles.iter().map(String::as_str).collect();
    let mut crush = BTreeMap::new();
    if node.is_osd_node() {
        roles.insert("osd");
        crush = node.crush.clone();
    }
    (roles, crush)
}

/// Label every live node after `spec_nodes`. Returns (changed, failed nodes).
async fn sync_node_labels(
    store: &dyn ObjectStore<Node>,
    live: Vec<Node>,
    spec_nodes: &BTreeMap<&str, &CephDeploymentNode>,
) -> (bool, usize) {
    let mut changed = false;
    let mut failures = 0;
    for mut node in live {
        let name = node.name_any();
        let (roles, crush) = wanted_labels(spec_nodes.get(name.as_str()).copied());
        let labels = node.labels_mut();
        let updated = sync_role_labels(labels, &roles) | sync_topology_labels(labels, &name, &crush);
        if !updated {
            continue;
        }
        info!(node = %name, "Updating node ceph labels");
        match store.update(&node).await {
            Ok(_) => changed = true,
            Err(e) => {
                error!(node = %name, error = %e, "Failed to update node labels");
                failures += 1;
            }
        }
    }
    (changed, failures)
}

/// `label nodes` step.
pub async fn ensure_label_nodes(pass: &PassContext<'_>) -> StepOutcome {
    let store = pass.stores.nodes.as_ref();
    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to list nodes: {e}"))?;

    let spec_nodes: BTreeMap<&str, &CephDeploymentNode> =
        pass.nodes.iter().map(|n| (n.name.as_str(), n)).collect();
    let mut failures = 0;
    for name in spec_nodes.keys() {
        if !live.iter().any(|n| n.name_any() == *name) {
            error!(node = %name, "Node from spec is not found in cluster");
            failures += 1;
        }
    }

    let (changed, failed) = sync_node_labels(store, live, &spec_nodes).await;
    if failures + failed > 0 {
        return Err("failed to set role or crush topology labels for some node(s)".to_string());
    }
    Ok(changed)
}

/// Set or drop one annotation key. Returns whether the node changed.
fn sync_annotation(node: &mut Node, key: &str, value: Option<&str>) -> bool {
    let annotations = node.annotations_mut();
    match value {
        Some(value) => set_label(annotations, key, value),
        None => annotations.remove(key).is_some(),
    }
}

async fn sync_node_annotations(store: &dyn ObjectStore<Node>, live: Vec<Node>, monitor_ips: &BTreeMap<&str, &str>) -> (bool, usize) {
    let mut changed = false;
    let mut failures = 0;
    for mut node in live {
        let name = node.name_any();
        let ip = monitor_ips.get(name.as_str()).copied();
        if !sync_annotation(&mut node, MON_IP_ANNOTATION, ip) {
            continue;
        }
        info!(node = %name, "Updating node rook annotations");
        match store.update(&node).await {
            Ok(_) => changed = true,
            Err(e) => {
                error!(node = %name, error = %e, "Failed to update node annotations");
                failures += 1;
            }
        }
    }
    (changed, failures)
}

/// `annotate nodes` step.
pub async fn ensure_annotate_nodes(pass: &PassContext<'_>) -> StepOutcome {
    let store = pass.stores.nodes.as_ref();
    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to list nodes: {e}"))?;
    let monitor_ips: BTreeMap<&str, &str> = pass
        .nodes
        .iter()
        .filter_map(|n| {
            n.monitor_ip
                .as_deref()
                .filter(|ip| !ip.is_empty())
                .map(|ip| (n.name.as_str(), ip))
        })
        .collect();

    let (changed, failures) = sync_node_annotations(store, live, &monitor_ips).await;
    if failures > 0 {
        return Err("failed to set rook annotations for some node(s)".to_string());
    }
    Ok(changed)
}

/// Drop role and crush labels from every node. `Ok(true)` once nothing was left.
pub async fn delete_node_labels(store: &dyn ObjectStore<Node>) -> StepOutcome {
    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to list nodes: {e}"))?;
    let (changed, failures) = sync_node_labels(store, live, &BTreeMap::new()).await;
    if failures > 0 {
        return Err("failed to delete ceph role or crush topology labels from node(s)".to_string());
    }
    Ok(!changed)
}

/// Drop the monitor IP annotation from every node.
pub async fn delete_node_annotations(store: &dyn ObjectStore<Node>) -> StepOutcome {
    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to list nodes: {e}"))?;
    let (changed, failures) = sync_node_annotations(store, live, &BTreeMap::new()).await;
    if failures > 0 {
        return Err("failed to delete rook annotations from node(s)".to_string());
    }
    Ok(!changed)
}

/// Drop the csi daemonset label from every node.
pub async fn delete_daemonset_labels(store: &dyn ObjectStore<Node>) -> StepOutcome {
    let live = store
        .list(Some(DAEMONSET_NODE_LABEL))
        .await
        .map_err(|e| format!("failed to list nodes: {e}"))?;
    let removed = live.is_empty();
    let mut failures = 0;
    for mut node in live {
        let name = node.name_any();
        node.labels_mut().remove(DAEMONSET_NODE_LABEL);
        debug!(node = %name, label = DAEMONSET_NODE_LABEL, "Removing node label");
        if let Err(e) = store.update(&node).await {
            error!(node = %name, error = %e, "Failed to remove daemonset label");
            failures += 1;
        }
    }
    if failures > 0 {
        return Err(format!("failed to remove '{DAEMONSET_NODE_LABEL}' label from node(s)"));
    }
    Ok(removed)
}
