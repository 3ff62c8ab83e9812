//! Setup checks run once the companion objects exist and before the
//! lifecycle check: daemonset node labels, the Rook image of the Rook apps
//! and the image of the CephCluster.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, PodSpec};
use kube::ResourceExt;
use tracing::{debug, error, info};

use crate::controller::common::is_ceph_deployed;
use crate::controller::config::OperatorConfig;
use crate::resources::common::DAEMONSET_NODE_LABEL;
use crate::store::{ObjectStore, Stores};

/// Node annotation requesting the daemonset pods to leave the node.
pub const DRAIN_REQUEST_ANNOTATION: &str = "kaas.mirantis.com/lcm-drained";
pub const ROOK_OPERATOR_NAME: &str = "rook-ceph-operator";
pub const ROOK_DISCOVER_NAME: &str = "rook-discover";

fn drain_requested(node: &Node) -> bool {
    node.annotations().get(DRAIN_REQUEST_ANNOTATION).map(String::as_str) == Some("true")
}

/// Put the daemonset label on every node able to run the csi daemonsets and
/// take it off drained or excluded nodes. Failures are only logged.
pub async fn ensure_daemonset_labels(store: &dyn ObjectStore<Node>, exclude_selector: Option<&str>) {
    debug!("Ensuring daemonset node labels");
    let nodes = match store.list(None).await {
        Ok(nodes) => nodes,
        Err(e) => {
            error!(error = %e, "ceph daemonsets label ensure failed: failed to list nodes");
            return;
        }
    };
    let excluded: BTreeSet<String> = match exclude_selector {
        Some(selector) => match store.list(Some(selector)).await {
            Ok(matched) => matched.iter().map(ResourceExt::name_any).collect(),
            Err(e) => {
                error!(selector = %selector, error = %e, "ceph daemonsets label ensure failed: failed to list excluded nodes");
                return;
            }
        },
        None => BTreeSet::new(),
    };

    for mut node in nodes {
        let name = node.name_any();
        let wanted = !drain_requested(&node) && !excluded.contains(&name);
        if node.labels().get(DAEMONSET_NODE_LABEL).map(String::as_str) == wanted.then_some("true") {
            continue;
        }
        if wanted {
            info!(node = %name, label = DAEMONSET_NODE_LABEL, "Adding daemonset label");
            node.labels_mut().insert(DAEMONSET_NODE_LABEL.to_string(), "true".to_string());
        } else {
            info!(node = %name, label = DAEMONSET_NODE_LABEL, "Dropping daemonset label");
            node.labels_mut().remove(DAEMONSET_NODE_LABEL);
        }
        if let Err(e) = store.update(&node).await {
            error!(node = %name, error = %e, "ceph daemonsets label ensure failed: failed to update node");
        }
    }
}

fn deployment_ready(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let replicas = status.replicas.unwrap_or_default();
    replicas > 0
        && status.updated_replicas.unwrap_or_default() == replicas
        && status.ready_replicas.unwrap_or_default() == replicas
        && status.available_replicas.unwrap_or_default() == replicas
}

/// Ready, or nothing scheduled at all (external clusters run no discover pods).
fn daemon_set_settled(daemon_set: &DaemonSet) -> bool {
    let Some(status) = daemon_set.status.as_ref() else {
        return false;
    };
    let available = status.number_available.unwrap_or_default();
    status.desired_number_scheduled == 0
        || (status.number_ready > 0
            && status.current_number_scheduled == status.desired_number_scheduled
            && status.desired_number_scheduled == status.number_ready
            && status.number_ready == available
            && available == status.updated_number_scheduled.unwrap_or_default())
}

/// Point the first container at `image`. `true` when it was changed.
fn set_pod_image(pod: Option<&mut PodSpec>, image: &str) -> bool {
    let Some(container) = pod.and_then(|p| p.containers.first_mut()) else {
        return false;
    };
    if container.image.as_deref() == Some(image) {
        return false;
    }
    container.image = Some(image.to_string());
    true
}

async fn ensure_operator_image(stores: &Stores, rook_ns: &str, image: &str) -> Result<(), String> {
    let mut operator = stores
        .rook_deployments
        .get(ROOK_OPERATOR_NAME)
        .await
        .map_err(|e| format!("failed to get {rook_ns}/{ROOK_OPERATOR_NAME} deployment: {e}"))?
        .ok_or_else(|| format!("failed to get {rook_ns}/{ROOK_OPERATOR_NAME} deployment"))?;
    if operator.spec.as_ref().and_then(|s| s.replicas) == Some(0) {
        info!("skipping rook image consistency verification due to {rook_ns}/{ROOK_OPERATOR_NAME} deployment is scaled to zero");
        return Ok(());
    }
    let pod = operator.spec.as_mut().and_then(|s| s.template.spec.as_mut());
    if set_pod_image(pod, image) {
        info!("rook image in {rook_ns}/{ROOK_OPERATOR_NAME} deployment is different from the current release, updating");
        stores.rook_deployments.update(&operator).await.map_err(|e| {
            format!("failed to update {rook_ns}/{ROOK_OPERATOR_NAME} deployment with new rook image: {e}")
        })?;
        return Err(format!("deployment {rook_ns}/{ROOK_OPERATOR_NAME} rook image update is in progress"));
    }
    if !deployment_ready(&operator) {
        return Err(format!("deployment {rook_ns}/{ROOK_OPERATOR_NAME} rook image update still is in progress"));
    }
    Ok(())
}

async fn ensure_discover_image(stores: &Stores, rook_ns: &str, image: &str) -> Result<(), String> {
    if !is_ceph_deployed(stores).await {
        return Ok(());
    }
    let mut discover = stores
        .rook_daemon_sets
        .get(ROOK_DISCOVER_NAME)
        .await
        .map_err(|e| format!("failed to get {rook_ns}/{ROOK_DISCOVER_NAME} daemonset: {e}"))?
        .ok_or_else(|| format!("failed to get {rook_ns}/{ROOK_DISCOVER_NAME} daemonset"))?;
    let pod = discover.spec.as_mut().and_then(|s| s.template.spec.as_mut());
    if set_pod_image(pod, image) {
        info!("rook image in {rook_ns}/{ROOK_DISCOVER_NAME} daemonset is different from the current release, updating");
        stores.rook_daemon_sets.update(&discover).await.map_err(|e| {
            format!("failed to update {rook_ns}/{ROOK_DISCOVER_NAME} daemonset with new rook image: {e}")
        })?;
        return Err(format!("daemonset {rook_ns}/{ROOK_DISCOVER_NAME} rook image update is in progress"));
    }
    if !daemon_set_settled(&discover) {
        return Err(format!("daemonset {rook_ns}/{ROOK_DISCOVER_NAME} rook image update still is in progress"));
    }
    Ok(())
}

/// Roll the Rook operator and discover daemonset to `image`.
pub async fn ensure_rook_image(stores: &Stores, rook_ns: &str, image: &str) -> Result<(), String> {
    info!("ensure rook image version is consistent with the current ceph version");
    ensure_operator_image(stores, rook_ns, image).await?;
    ensure_discover_image(stores, rook_ns, image).await
}

/// Move the CephCluster to `image` even when the cluster step would hold
/// back its changes.
pub async fn ensure_cluster_image(stores: &Stores, name: &str, rook_ns: &str, image: &str) -> Result<(), String> {
    let Some(mut cluster) = stores
        .clusters
        .get(name)
        .await
        .map_err(|e| format!("failed to get {rook_ns}/{name} CephCluster: {e}"))?
    else {
        return Ok(());
    };
    if cluster.spec.ceph_version.image == image {
        return Ok(());
    }
    info!(
        "updating CephCluster image from '{}' to '{image}'",
        cluster.spec.ceph_version.image
    );
    cluster.spec.ceph_version.image = image.to_string();
    stores
        .clusters
        .update(&cluster)
        .await
        .map_err(|e| format!("failed to update CephCluster {rook_ns}/{name} version: {e}"))?;
    Err(format!("update CephCluster {rook_ns}/{name} version is in progress"))
}

/// All setup checks of a pass. Daemonset labels never fail it.
pub async fn verify_setup(stores: &Stores, config: &OperatorConfig, name: &str) -> Result<(), String> {
    ensure_daemonset_labels(stores.nodes.as_ref(), config.daemonset_exclude_selector.as_deref()).await;
    let rook_ns = config.rook_namespace.as_str();
    if let Some(image) = config.rook_image.as_deref() {
        ensure_rook_image(stores, rook_ns, image)
            .await
            .map_err(|e| format!("failed to ensure consistent Rook image version: {e}"))?;
    }
    ensure_cluster_image(stores, name, rook_ns, &config.ceph_image)
        .await
        .map_err(|e| format!("failed to ensure consistent Ceph cluster version: {e}"))
}
