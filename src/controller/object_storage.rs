//! `ceph object storage` step: multisite graph, gateway and its external
//! Service.

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{error, info};

use crate::controller::differ::{
    Convergent, ObjectProcess, Readiness, StepOutcome, combine, process, rook_readiness,
};
use crate::controller::multisite::{delete_multisite, ensure_multisite};
use crate::controller::pass::PassContext;
use crate::crd::{ObjectStorageSpec, builtin_pool_object_name};
use crate::resources::object_storage::{
    default_realm_name, external_service_name, generate_external_service, generate_object_store,
};
use crate::store::Stores;

const RGW_ROOT_POOL: &str = ".rgw.root";

/// Reject a gateway zone the multisite section does not declare.
fn check_zone(object_storage: &ObjectStorageSpec) -> Result<(), String> {
    let Some(zone) = object_storage.rgw.zone.as_ref().filter(|z| !z.name.is_empty()) else {
        return Ok(());
    };
    let declared = object_storage
        .multi_site
        .as_ref()
        .is_some_and(|ms| ms.zones.iter().any(|z| z.name == zone.name));
    if declared {
        Ok(())
    } else {
        Err(format!("failed to generate rgw with unknown {} zone", zone.name))
    }
}

fn same_service(live: &Service, desired: &Service) -> bool {
    let (Some(live_spec), Some(want)) = (live.spec.as_ref(), desired.spec.as_ref()) else {
        return false;
    };
    live_spec.type_ == want.type_
        && live_spec.ports == want.ports
        && live_spec.selector == want.selector
        && live.labels() == desired.labels()
}

async fn ensure_external_service(pass: &PassContext<'_>, object_storage: &ObjectStorageSpec) -> StepOutcome {
    let rook_ns = pass.rook_namespace();
    let store = pass.stores.services.as_ref();
    let name = external_service_name(&object_storage.rgw.name);
    let live = store
        .get(&name)
        .await
        .map_err(|e| format!("failed to get rgw external service: {e}"))?;

    let Some(access_label) = pass.config.rgw_public_access_label() else {
        if live.is_none() {
            return Ok(false);
        }
        info!(namespace = %rook_ns, service = %name, "Removing rgw external service");
        return match store.delete(&name).await {
            Err(e) if !e.is_not_found() => Err(format!("failed to cleanup rgw external service {name}: {e}")),
            _ => Ok(true),
        };
    };

    let desired = generate_external_service(&object_storage.rgw, Some(access_label), rook_ns);
    match live {
        None => {
            info!(namespace = %rook_ns, service = %name, "Creating rgw external service");
            store
                .create(&desired)
                .await
                .map_err(|e| format!("failed to create rgw external service: {e}"))?;
            Ok(true)
        }
        Some(current) if same_service(&current, &desired) => Ok(false),
        Some(mut current) => {
            info!(namespace = %rook_ns, service = %name, "Updating rgw external service");
            if let (Some(spec), Some(want)) = (current.spec.as_mut(), desired.spec) {
                spec.type_ = want.type_;
                spec.ports = want.ports;
                spec.selector = want.selector;
                spec.session_affinity = want.session_affinity;
            }
            current.metadata.labels = desired.metadata.labels;
            store
                .update(&current)
                .await
                .map_err(|e| format!("failed to update rgw external service: {e}"))?;
            Ok(true)
        }
    }
}

/// Create or update the CephObjectStore of the gateway.
///
/// A live store is updated only when ready, and never moved to another zone.
async fn ensure_object_store(pass: &PassContext<'_>, object_storage: &ObjectStorageSpec) -> StepOutcome {
    check_zone(object_storage)?;
    let rook_ns = pass.rook_namespace();
    let rgw = &object_storage.rgw;
    let store = pass.stores.object_stores.as_ref();
    let desired = generate_object_store(
        rgw,
        default_realm_name(object_storage).is_some(),
        &pass.timestamps.snapshot(&pass.key()),
        rook_ns,
    );

    let live = store
        .get(&rgw.name)
        .await
        .map_err(|e| format!("failed to get rgw object store: {e}"))?;
    let Some(mut current) = live else {
        info!(namespace = %rook_ns, rgw = %rgw.name, "Creating rgw object store");
        process(store, ObjectProcess::Create, &desired, rook_ns).await?;
        return Ok(true);
    };
    if current.same_spec(&desired) {
        return Ok(false);
    }
    if current.spec.zone != desired.spec.zone {
        return Err("failed to update rgw, zone change is not supported".to_string());
    }
    if let Readiness::NotReady { phase } = rook_readiness(current.status.as_ref()) {
        return Err(format!(
            "rgw is not ready to be updated, current phase is {}",
            phase.as_deref().unwrap_or("unknown")
        ));
    }
    info!(namespace = %rook_ns, rgw = %rgw.name, "Updating rgw object store");
    current.adopt_spec(&desired);
    process(store, ObjectProcess::Update, &current, rook_ns).await?;
    Ok(true)
}

async fn ensure_rgw(pass: &PassContext<'_>, object_storage: &ObjectStorageSpec) -> StepOutcome {
    let object_store = ensure_object_store(pass, object_storage)
        .await
        .map_err(|e| format!("failed to ensure rgw object store: {e}"));
    let service = ensure_external_service(pass, object_storage).await;
    combine("rgw", [object_store, service])
}

pub async fn ensure_object_storage(pass: &PassContext<'_>) -> StepOutcome {
    let rook_ns = pass.rook_namespace();
    let external = pass.spec().external;
    let Some(object_storage) = pass.spec().object_storage.as_ref() else {
        return delete_object_storage(pass.stores, rook_ns, external)
            .await
            .map(|removed| !removed);
    };

    let mut outcomes = Vec::new();
    if !external {
        let multisite = match object_storage.multi_site {
            Some(_) => ensure_multisite(pass)
                .await
                .map_err(|e| format!("failed to ensure ceph object storage multisite: {e}")),
            None => delete_multisite(pass.stores, rook_ns)
                .await
                .map(|removed| !removed)
                .map_err(|e| format!("failed to cleanup object storage multisite: {e}")),
        };
        outcomes.push(multisite);
    }
    outcomes.push(
        ensure_rgw(pass, object_storage)
            .await
            .map_err(|e| format!("failed to ensure ceph rgw: {e}")),
    );
    combine("object storage", outcomes)
}

/// Remove every object store together with its external Service.
async fn delete_rgw(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let live = stores
        .object_stores
        .list(None)
        .await
        .map_err(|e| format!("failed to list rgw object stores: {e}"))?;
    if live.is_empty() {
        return Ok(true);
    }
    let mut errors = Vec::new();
    for object_store in live {
        let name = object_store.name_any();
        let service = external_service_name(&name);
        if let Err(e) = stores.services.delete(&service).await
            && !e.is_not_found()
        {
            errors.push(format!("failed to cleanup rgw external service {service}: {e}"));
            continue;
        }
        info!(namespace = %rook_namespace, rgw = %name, "Removing rgw object store");
        if let Err(e) = process(stores.object_stores.as_ref(), ObjectProcess::Delete, &object_store, rook_namespace).await {
            errors.push(e);
        }
    }
    if errors.is_empty() {
        Ok(false)
    } else {
        error!(errors = ?errors, "Failed to remove rgw object stores");
        Err("failed to cleanup rgw object store resources".to_string())
    }
}

async fn delete_rgw_root_pool(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let name = builtin_pool_object_name(RGW_ROOT_POOL);
    info!(namespace = %rook_namespace, pool = %name, "Removing builtin rgw pool");
    match stores.block_pools.delete(&name).await {
        Ok(()) => Ok(false),
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => Err(format!("failed to delete builtin rgw pool {rook_namespace}/{name}: {e}")),
    }
}

/// Object storage teardown: gateway first, then the multisite graph, then
/// the builtin `.rgw.root` pool.
///
/// Returns `Ok(true)` once everything is gone.
pub async fn delete_object_storage(stores: &Stores, rook_namespace: &str, external: bool) -> StepOutcome {
    let mut removed = true;
    let mut failed = false;
    let mut record = |outcome: StepOutcome| match outcome {
        Ok(done) => {
            removed &= done;
            done
        }
        Err(e) => {
            error!(error = %e, "Object storage cleanup failed");
            failed = true;
            removed = false;
            false
        }
    };

    let rgw_removed = record(delete_rgw(stores, rook_namespace).await);
    if rgw_removed && !external {
        let multisite_removed = record(delete_multisite(stores, rook_namespace).await);
        if multisite_removed {
            record(delete_rgw_root_pool(stores, rook_namespace).await);
        }
    }
    if failed {
        return Err("failed to cleanup object storage".to_string());
    }
    Ok(removed)
}
