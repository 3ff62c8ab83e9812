//! `ingress proxy` step.

use crate::controller::differ::{DiffScope, StepOutcome, converge};
use crate::controller::pass::PassContext;
use crate::resources::ingress::{generate_ingress, managed_selector};
use crate::store::Stores;

/// Keep one Ingress for the gateway while both object storage and an
/// ingress TLS config are set; remove managed ingresses otherwise.
pub async fn ensure_ingress(pass: &PassContext<'_>) -> StepOutcome {
    let spec = pass.spec();
    let ingress_config = spec.ingress_config.as_ref();
    let desired = match (
        spec.object_storage.as_ref(),
        ingress_config,
        ingress_config.and_then(|c| c.tls_config.as_ref()),
    ) {
        (Some(object_storage), Some(config), Some(tls)) => vec![generate_ingress(
            &object_storage.rgw.name,
            config,
            tls,
            pass.config.rgw_public_access_label(),
            pass.rook_namespace(),
        )],
        _ => Vec::new(),
    };
    let selector = managed_selector();
    let scope = DiffScope {
        kinds: "Ingresses",
        namespace: pass.rook_namespace(),
        selector: Some(&selector),
    };
    converge(pass.stores.ingresses.as_ref(), &scope, desired).await
}

pub async fn delete_ingress(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let selector = managed_selector();
    let scope = DiffScope {
        kinds: "Ingresses",
        namespace: rook_namespace,
        selector: Some(&selector),
    };
    converge(stores.ingresses.as_ref(), &scope, Vec::new())
        .await
        .map(|changed| !changed)
}
