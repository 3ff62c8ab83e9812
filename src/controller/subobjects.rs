//! Companion objects sharing the name of their CephDeployment.

use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{error, info};

use crate::controller::common::owner_reference;
use crate::crd::{
    CephDeployment, CephDeploymentHealth, CephDeploymentHealthSpec, CephDeploymentMaintenance,
    CephDeploymentMaintenanceSpec, CephDeploymentSecret, CephDeploymentSecretSpec, ObjectRef,
};
use crate::store::{ObjectStore, Stores};

fn object_ref<K>(name: &str, namespace: &str) -> ObjectRef
where
    K: Resource<DynamicType = ()>,
{
    ObjectRef {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

/// Create `desired` unless an object of its name exists.
async fn ensure_companion<K>(store: &dyn ObjectStore<K>, desired: K) -> Result<ObjectRef, String>
where
    K: Resource<DynamicType = ()> + Send + Sync,
{
    let kind = K::kind(&());
    let name = desired.name_any();
    let namespace = desired.namespace().unwrap_or_default();
    match store.get(&name).await {
        Ok(Some(_)) => Ok(object_ref::<K>(&name, &namespace)),
        Ok(None) => match store.create(&desired).await {
            Ok(_) => {
                info!(namespace = %namespace, name = %name, "Created {kind}");
                Ok(object_ref::<K>(&name, &namespace))
            }
            Err(e) => {
                error!(namespace = %namespace, name = %name, error = %e, "Failed to create {kind}");
                Err(format!("failed to create {kind}"))
            }
        },
        Err(e) => {
            error!(namespace = %namespace, name = %name, error = %e, "Failed to get {kind}");
            Err(format!("failed to check {kind} presence"))
        }
    }
}

/// Ensure the health, secret and maintenance companions of `deployment`.
///
/// Returns the references of the companions that exist and, when any of
/// them could not be checked or created, the joined issues.
pub async fn ensure_subobjects(stores: &Stores, deployment: &CephDeployment) -> (Vec<ObjectRef>, Option<String>) {
    let metadata = ObjectMeta {
        name: Some(deployment.name_any()),
        namespace: deployment.namespace(),
        owner_references: Some(vec![owner_reference(deployment)]),
        ..Default::default()
    };

    let results = [
        ensure_companion(
            stores.healths.as_ref(),
            CephDeploymentHealth {
                metadata: metadata.clone(),
                spec: CephDeploymentHealthSpec {},
            },
        )
        .await,
        ensure_companion(
            stores.lcm_secrets.as_ref(),
            CephDeploymentSecret {
                metadata: metadata.clone(),
                spec: CephDeploymentSecretSpec {},
            },
        )
        .await,
        ensure_companion(
            stores.maintenances.as_ref(),
            CephDeploymentMaintenance {
                metadata,
                spec: CephDeploymentMaintenanceSpec {},
                status: None,
            },
        )
        .await,
    ];

    let mut refs = Vec::new();
    let mut issues = Vec::new();
    for result in results {
        match result {
            Ok(obj_ref) => refs.push(obj_ref),
            Err(issue) => issues.push(issue),
        }
    }
    let issues = (!issues.is_empty()).then(|| issues.join(", "));
    (refs, issues)
}
