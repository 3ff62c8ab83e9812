//! Teardown orchestrator for a CephDeployment being deleted.
//!
//! Stage A removes everything built on top of the Ceph cluster; stage B,
//! which only runs once stage A is complete, removes the cluster itself and
//! the node-level marks. Each handler reports whether its part is gone; a
//! pass finishes only when every handler reports so without error.

use tracing::{error, info};

use crate::controller::children::{
    delete_block_pools, delete_clients, delete_network_policies, delete_rbd_mirror,
};
use crate::controller::cluster::delete_cluster;
use crate::controller::context::UpdateTimestamps;
use crate::controller::differ::StepOutcome;
use crate::controller::filesystems::delete_shared_filesystems;
use crate::controller::ingress::delete_ingress;
use crate::controller::nodes::{delete_daemonset_labels, delete_node_annotations, delete_node_labels};
use crate::controller::object_storage::delete_object_storage;
use crate::controller::openstack::delete_openstack_secret;
use crate::controller::storage_classes::delete_storage_classes;
use crate::resources::common::EXTERNAL_CONNECTION_SECRET_NAME;
use crate::store::{ObjectStore, Stores};

/// What a teardown pass needs to know about the deployment.
pub struct TeardownTarget<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub rook_namespace: &'a str,
    pub external: bool,
    pub openstack_shared_namespace: &'a str,
    /// The OpenStack secret is left to the user.
    pub disable_os_keys: bool,
    pub timestamps: &'a UpdateTimestamps,
    pub stores: &'a Stores,
}

impl TeardownTarget<'_> {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Removal handlers, in teardown order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    DeploymentSecret,
    DeploymentMaintenance,
    OpenstackSecret,
    ObjectStorage,
    IngressProxy,
    RbdMirror,
    Clients,
    BlockPools,
    SharedFilesystems,
    StorageClasses,
    ExternalConnectionSecret,
    NetworkPolicies,
    DeploymentHealth,
    CephCluster,
    NodeLabels,
    NodeAnnotations,
    DaemonsetLabels,
}

const STAGE_A: [TeardownStep; 12] = [
    TeardownStep::DeploymentSecret,
    TeardownStep::DeploymentMaintenance,
    TeardownStep::OpenstackSecret,
    TeardownStep::ObjectStorage,
    TeardownStep::IngressProxy,
    TeardownStep::RbdMirror,
    TeardownStep::Clients,
    TeardownStep::BlockPools,
    TeardownStep::SharedFilesystems,
    TeardownStep::StorageClasses,
    TeardownStep::ExternalConnectionSecret,
    TeardownStep::NetworkPolicies,
];

const STAGE_B: [TeardownStep; 5] = [
    TeardownStep::DeploymentHealth,
    TeardownStep::CephCluster,
    TeardownStep::NodeLabels,
    TeardownStep::NodeAnnotations,
    TeardownStep::DaemonsetLabels,
];

impl TeardownStep {
    fn name(self, target: &TeardownTarget<'_>) -> String {
        let companion = |kind: &str| format!("{kind} '{}/{}'", target.namespace, target.name);
        match self {
            TeardownStep::DeploymentSecret => companion("CephDeploymentSecret"),
            TeardownStep::DeploymentMaintenance => companion("CephDeploymentMaintenance"),
            TeardownStep::DeploymentHealth => companion("CephDeploymentHealth"),
            TeardownStep::OpenstackSecret => "openstack shared secret".to_string(),
            TeardownStep::ObjectStorage => "object storage".to_string(),
            TeardownStep::IngressProxy => "ingress proxy".to_string(),
            TeardownStep::RbdMirror => "rbd mirror".to_string(),
            TeardownStep::Clients => "ceph clients".to_string(),
            TeardownStep::BlockPools => "ceph block pools".to_string(),
            TeardownStep::SharedFilesystems => "ceph shared filesystem".to_string(),
            TeardownStep::StorageClasses => "storage classes".to_string(),
            TeardownStep::ExternalConnectionSecret => "external resources".to_string(),
            TeardownStep::NetworkPolicies => "network policies".to_string(),
            TeardownStep::CephCluster => "ceph cluster".to_string(),
            TeardownStep::NodeLabels => "node ceph labels".to_string(),
            TeardownStep::NodeAnnotations => "node ceph annotations".to_string(),
            TeardownStep::DaemonsetLabels => "daemonset ceph labels".to_string(),
        }
    }

    const fn local_only(self) -> bool {
        matches!(
            self,
            TeardownStep::IngressProxy
                | TeardownStep::BlockPools
                | TeardownStep::SharedFilesystems
                | TeardownStep::NetworkPolicies
                | TeardownStep::NodeLabels
                | TeardownStep::NodeAnnotations
        )
    }

    const fn external_only(self) -> bool {
        matches!(self, TeardownStep::ExternalConnectionSecret)
    }

    async fn run(self, target: &TeardownTarget<'_>) -> StepOutcome {
        let stores = target.stores;
        let rook_ns = target.rook_namespace;
        match self {
            TeardownStep::DeploymentSecret => delete_companion(stores.lcm_secrets.as_ref(), target.name).await,
            TeardownStep::DeploymentMaintenance => {
                delete_companion(stores.maintenances.as_ref(), target.name).await
            }
            TeardownStep::DeploymentHealth => delete_companion(stores.healths.as_ref(), target.name).await,
            TeardownStep::OpenstackSecret => {
                delete_openstack_secret(stores, target.openstack_shared_namespace, target.disable_os_keys).await
            }
            TeardownStep::ObjectStorage => delete_object_storage(stores, rook_ns, target.external).await,
            TeardownStep::IngressProxy => delete_ingress(stores, rook_ns).await,
            TeardownStep::RbdMirror => delete_rbd_mirror(stores, rook_ns).await,
            TeardownStep::Clients => delete_clients(stores, rook_ns).await,
            TeardownStep::BlockPools => delete_block_pools(stores, rook_ns).await,
            TeardownStep::SharedFilesystems => delete_shared_filesystems(stores, rook_ns).await,
            TeardownStep::StorageClasses => delete_storage_classes(stores).await,
            TeardownStep::ExternalConnectionSecret => {
                delete_companion(stores.namespace_secrets.as_ref(), EXTERNAL_CONNECTION_SECRET_NAME).await
            }
            TeardownStep::NetworkPolicies => delete_network_policies(stores, rook_ns).await,
            TeardownStep::CephCluster => {
                delete_cluster(stores, target.name, rook_ns, target.timestamps, &target.key()).await
            }
            TeardownStep::NodeLabels => delete_node_labels(stores.nodes.as_ref()).await,
            TeardownStep::NodeAnnotations => delete_node_annotations(stores.nodes.as_ref()).await,
            TeardownStep::DaemonsetLabels => delete_daemonset_labels(stores.nodes.as_ref()).await,
        }
    }
}

/// Delete a single named object. Gone ⇒ removed.
async fn delete_companion<K>(store: &dyn ObjectStore<K>, name: &str) -> StepOutcome
where
    K: Send + Sync,
{
    match store.delete(name).await {
        Ok(()) => Ok(false),
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => Err(e.to_string()),
    }
}

/// Steps of stage A and stage B for the given deployment mode.
pub fn stages(external: bool) -> (Vec<TeardownStep>, Vec<TeardownStep>) {
    let keep = |step: &TeardownStep| {
        if external {
            !step.local_only()
        } else {
            !step.external_only()
        }
    };
    (
        STAGE_A.into_iter().filter(keep).collect(),
        STAGE_B.into_iter().filter(keep).collect(),
    )
}

#[derive(Debug)]
struct Collector {
    finished: bool,
    errors: Vec<String>,
}

impl Collector {
    async fn run(&mut self, step: TeardownStep, target: &TeardownTarget<'_>) {
        let name = step.name(target);
        match step.run(target).await {
            Err(e) => {
                let message = format!("failed to remove {name}");
                error!(deployment = %target.key(), error = %e, "{message}");
                self.errors.push(message);
                self.finished = false;
            }
            Ok(removed) => {
                if !removed {
                    info!(deployment = %target.key(), "deletion of {name} is in progress");
                }
                self.finished &= removed;
            }
        }
    }
}

/// Run one teardown pass.
///
/// Returns `Ok(true)` when everything is gone and the finalizer may be
/// dropped, `Ok(false)` while removal is still in progress.
pub async fn teardown(target: &TeardownTarget<'_>) -> std::result::Result<bool, String> {
    info!(deployment = %target.key(), "Deleting resources for CephDeployment");
    let (stage_a, stage_b) = stages(target.external);
    let mut collector = Collector {
        finished: true,
        errors: Vec::new(),
    };
    for step in stage_a {
        collector.run(step, target).await;
    }
    if collector.finished {
        for step in stage_b {
            collector.run(step, target).await;
        }
    }
    if !collector.errors.is_empty() {
        return Err(format!(
            "deletion is not completed for CephDeployment: {}",
            collector.errors.join(", ")
        ));
    }
    Ok(collector.finished)
}
