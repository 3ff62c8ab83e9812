//! Shared controller helpers.
//!
//! Finalizer handling, owner references and the few cluster checks several steps
//! share.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use tracing::debug;

use crate::controller::error::Result;
use crate::crd::CephDeployment;
use crate::resources::common::MON_ENDPOINTS_NAME;
use crate::store::{ObjectStore, Stores};

/// Finalizer guarding CephDeployment teardown.
pub const FINALIZER: &str = "cephdeployment.lcm.mirantis.com/finalizer";

/// Add a finalizer to a resource.
///
/// Returns true when the finalizer was missing and got written.
pub async fn add_finalizer<T>(store: &dyn ObjectStore<T>, name: &str, finalizer: &str) -> Result<bool>
where
    T: Resource + Send + Sync,
{
    // Get current resource to check existing finalizers
    let Some(mut resource) = store.get(name).await? else {
        return Ok(false);
    };

    // Only add if not already present
    if resource.finalizers().iter().any(|f| f == finalizer) {
        return Ok(false);
    }
    resource.finalizers_mut().push(finalizer.to_string());
    store.update(&resource).await?;
    Ok(true)
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(store: &dyn ObjectStore<T>, name: &str, finalizer: &str) -> Result<()>
where
    T: Resource + Send + Sync,
{
    // Resource already deleted, nothing to do
    let Some(mut resource) = store.get(name).await? else {
        return Ok(());
    };

    // Only write if the finalizer exists
    let finalizers = resource.finalizers_mut();
    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);
        store.update(&resource).await?;
    }
    Ok(())
}

/// Controller owner reference pointing at a CephDeployment.
pub fn owner_reference(dpl: &CephDeployment) -> OwnerReference {
    OwnerReference {
        api_version: CephDeployment::api_version(&()).to_string(),
        kind: CephDeployment::kind(&()).to_string(),
        name: dpl.name_any(),
        uid: dpl.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// `<namespace>/<name>` identity of a CephDeployment.
pub fn deployment_key(dpl: &CephDeployment) -> String {
    format!("{}/{}", dpl.namespace().unwrap_or_default(), dpl.name_any())
}

/// Current time as RFC 3339 with second precision.
pub fn now_rfc3339() -> String {
    jiff::Timestamp::now()
        .strftime("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Whether Rook has deployed the monitors, judged by the mon endpoints ConfigMap.
pub async fn is_ceph_deployed(stores: &Stores) -> bool {
    match stores.config_maps.get(MON_ENDPOINTS_NAME).await {
        Ok(found) => found.is_some(),
        Err(e) => {
            debug!(error = %e, "Failed to get mon endpoints ConfigMap");
            false
        }
    }
}
