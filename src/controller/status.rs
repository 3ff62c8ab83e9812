//! Status persistence for CephDeployment.

use tracing::debug;

use crate::controller::error::Result;
use crate::crd::{CephDeployment, CephDeploymentStatus};
use crate::store::ObjectStore;

/// Write `status` onto the latest copy of the deployment.
///
/// A deployment that is already gone is not an error. Returns whether a
/// write happened.
pub async fn persist_status(
    store: &dyn ObjectStore<CephDeployment>,
    name: &str,
    status: &CephDeploymentStatus,
) -> Result<bool> {
    let Some(mut latest) = store.get(name).await? else {
        debug!(name = %name, "CephDeployment is gone, skipping status update");
        return Ok(false);
    };
    if latest.status.as_ref() == Some(status) {
        return Ok(false);
    }
    latest.status = Some(status.clone());
    store.replace_status(&latest).await?;
    Ok(true)
}
