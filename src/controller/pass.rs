//! Immutable inputs shared by every step of one reconcile pass.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::controller::common::{deployment_key, owner_reference};
use crate::controller::config::OperatorConfig;
use crate::controller::context::UpdateTimestamps;
use crate::crd::{CephDeployment, CephDeploymentNode, CephDeploymentSpec};
use crate::store::Stores;

/// Everything a step needs to know about the pass it runs in.
pub struct PassContext<'a> {
    pub deployment: &'a CephDeployment,
    pub name: String,
    pub namespace: String,
    /// Node list after group and label expansion.
    pub nodes: Vec<CephDeploymentNode>,
    pub config: &'a OperatorConfig,
    pub timestamps: &'a UpdateTimestamps,
    pub owner: OwnerReference,
    pub stores: &'a Stores,
}

impl<'a> PassContext<'a> {
    pub fn new(
        deployment: &'a CephDeployment,
        nodes: Vec<CephDeploymentNode>,
        config: &'a OperatorConfig,
        timestamps: &'a UpdateTimestamps,
        stores: &'a Stores,
    ) -> Self {
        Self {
            deployment,
            name: deployment.name_any(),
            namespace: deployment.namespace().unwrap_or_default(),
            nodes,
            config,
            timestamps,
            owner: owner_reference(deployment),
            stores,
        }
    }

    pub fn spec(&self) -> &CephDeploymentSpec {
        &self.deployment.spec
    }

    pub fn rook_namespace(&self) -> &str {
        &self.config.rook_namespace
    }

    pub fn ceph_image(&self) -> &str {
        &self.config.ceph_image
    }

    /// Key of this deployment in the cross-pass caches.
    pub fn key(&self) -> String {
        deployment_key(self.deployment)
    }
}
