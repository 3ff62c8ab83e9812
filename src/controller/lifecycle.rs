//! Holds other controllers place on the reconcile.

use kube::ResourceExt;
use tracing::info;

use crate::controller::phase::LifecycleHold;
use crate::store::Stores;

/// Check whether an OSD remove task or an active maintenance pauses the
/// reconcile of the deployment `name`.
///
/// Remove tasks only matter for clusters this operator deploys.
pub async fn check_lifecycle(
    stores: &Stores,
    name: &str,
    namespace: &str,
    external: bool,
) -> Result<Option<LifecycleHold>, String> {
    if !external {
        let tasks = stores
            .osd_remove_tasks
            .list(None)
            .await
            .map_err(|e| format!("failed to list CephOsdRemoveTasks in {namespace} namespace: {e}"))?;
        if let Some(task) = tasks.iter().find(|t| t.holds_reconcile()) {
            info!(
                namespace = %namespace,
                task = %task.name_any(),
                phase = ?task.status.as_ref().map(|s| s.phase),
                "Found CephOsdRemoveTask holding reconcile until it completes"
            );
            return Ok(Some(LifecycleHold::OnHold));
        }
    }

    let maintenance = stores
        .maintenances
        .get(name)
        .await
        .map_err(|e| format!("failed to check CephDeploymentMaintenance state: {e}"))?;
    if maintenance.is_some_and(|m| m.is_acting()) {
        info!(namespace = %namespace, name = %name, "CephDeploymentMaintenance is acting");
        return Ok(Some(LifecycleHold::Maintenance));
    }
    Ok(None)
}
