//! `storageclasses` step.
//!
//! StorageClass parameters are immutable, so existing classes only get their
//! managed labels and default annotation synced. A new class is created only
//! once the pool or filesystem behind it is ready.

use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;
use tracing::{error, info, warn};

use crate::controller::differ::{Readiness, StepOutcome, rook_readiness};
use crate::controller::pass::PassContext;
use crate::resources::common::{CEPHFS_PROVISIONER, STORAGE_CLASS_LABEL};
use crate::resources::storage_classes::{desired_storage_classes, is_removable, sync_metadata};
use crate::store::Stores;

fn parameter<'a>(sc: &'a StorageClass, key: &str) -> &'a str {
    sc.parameters
        .as_ref()
        .and_then(|p| p.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}

/// Why a class cannot be created yet, if its backing object is not ready.
async fn creation_blocker(pass: &PassContext<'_>, sc: &StorageClass) -> Option<String> {
    let name = sc.name_any();
    if sc.provisioner == CEPHFS_PROVISIONER {
        let fs = parameter(sc, "fsName");
        let readiness = match pass.stores.filesystems.get(fs).await {
            Ok(found) => found.map(|f| rook_readiness(f.status.as_ref())),
            Err(e) => return Some(format!("failed to get CephFS {fs}: {e}")),
        };
        return (readiness != Some(Readiness::Ready))
            .then(|| format!("failed to create StorageClass {name} since corresponding {fs} CephFs is not ready yet"));
    }
    let pool = parameter(sc, "pool");
    let pools = match pass.stores.block_pools.list(None).await {
        Ok(pools) => pools,
        Err(e) => return Some(format!("failed to list CephBlockPools: {e}")),
    };
    let ready = pools.iter().any(|p| {
        let ceph_name = p.spec.name.clone().unwrap_or_else(|| p.name_any());
        ceph_name == pool && rook_readiness(p.status.as_ref()) == Readiness::Ready
    });
    (!ready).then(|| format!("failed to create StorageClass {name} since corresponding {pool} pool is not ready yet"))
}

pub async fn ensure_storage_classes(pass: &PassContext<'_>) -> StepOutcome {
    let store = pass.stores.storage_classes.as_ref();
    let external = pass.spec().external;
    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to get storage classes list: {e}"))?;
    let mut live: BTreeMap<String, StorageClass> = live.into_iter().map(|sc| (sc.name_any(), sc)).collect();

    let filesystems = pass
        .spec()
        .shared_filesystem
        .as_ref()
        .map(|s| s.ceph_fs.as_slice())
        .unwrap_or_default();
    let desired = desired_storage_classes(&pass.spec().pools, filesystems, external, pass.rook_namespace());

    let mut create = Vec::new();
    let mut update = Vec::new();
    for want in desired {
        let name = want.name_any();
        match live.remove(&name) {
            None => create.push(want),
            Some(current) => {
                if current.parameters != want.parameters {
                    warn!(
                        storage_class = %name,
                        "StorageClass parameters are immutable, recreate the class to apply new parameters"
                    );
                }
                if let Some(updated) = sync_metadata(&current, &want) {
                    update.push(updated);
                }
            }
        }
    }
    let delete: Vec<StorageClass> = live.into_values().filter(is_removable).collect();
    let changed = !create.is_empty() || !update.is_empty() || !delete.is_empty();

    let mut create_errors = Vec::new();
    for sc in &create {
        if !external && let Some(blocker) = creation_blocker(pass, sc).await {
            create_errors.push(blocker);
            continue;
        }
        info!(storage_class = %sc.name_any(), "Creating StorageClass");
        if let Err(e) = store.create(sc).await {
            create_errors.push(format!("failed to create StorageClass {}: {e}", sc.name_any()));
        }
    }
    let mut update_errors = Vec::new();
    for sc in &update {
        info!(storage_class = %sc.name_any(), "Updating StorageClass labels and annotations");
        if let Err(e) = store.update(sc).await {
            update_errors.push(format!("failed to update StorageClass {}: {e}", sc.name_any()));
        }
    }
    let mut delete_errors = Vec::new();
    for sc in &delete {
        info!(storage_class = %sc.name_any(), "Removing StorageClass");
        match store.delete(&sc.name_any()).await {
            Err(e) if !e.is_not_found() => {
                delete_errors.push(format!("failed to delete StorageClass {}: {e}", sc.name_any()))
            }
            _ => {}
        }
    }

    let mut errors = Vec::new();
    for (op, failures) in [
        ("create", create_errors),
        ("update", update_errors),
        ("delete", delete_errors),
    ] {
        if failures.is_empty() {
            continue;
        }
        let message = format!("failed to {op} storageclasses: {}", failures.join(", "));
        error!(error = %message, "StorageClass ensure failed");
        errors.push(message);
    }
    match errors.as_slice() {
        [] => Ok(changed),
        [single] => Err(single.clone()),
        _ => Err("multiple errors during storageclasses ensure".to_string()),
    }
}

/// Remove every managed StorageClass.
pub async fn delete_storage_classes(stores: &Stores) -> StepOutcome {
    let store = stores.storage_classes.as_ref();
    let selector = format!("{STORAGE_CLASS_LABEL}=true");
    let classes = store
        .list(Some(&selector))
        .await
        .map_err(|e| format!("failed to get storage classes list: {e}"))?;
    if classes.is_empty() {
        return Ok(true);
    }
    let mut failed = Vec::new();
    for sc in classes {
        let name = sc.name_any();
        info!(storage_class = %name, "Removing StorageClass");
        match store.delete(&name).await {
            Err(e) if !e.is_not_found() => {
                error!(storage_class = %name, error = %e, "Failed to remove StorageClass");
                failed.push(name);
            }
            _ => {}
        }
    }
    if failed.is_empty() {
        Ok(false)
    } else {
        Err(format!("failed to delete storageclasses: {}", failed.join(", ")))
    }
}
