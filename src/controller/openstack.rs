//! `Openstack secret` step: keys and endpoints for OpenStack services.

use tracing::{debug, error, info, warn};

use crate::controller::differ::StepOutcome;
use crate::controller::pass::PassContext;
use crate::resources::common::MON_ENDPOINTS_NAME;
use crate::resources::openstack::{
    ADMIN_SECRET_NAME, OPENSTACK_SECRET_NAME, OpenstackKeys, admin_key_field, generate_openstack_secret,
    openstack_clients,
};
use crate::store::Stores;

fn pool_ready(pool: Option<&crate::crd::CephBlockPool>) -> bool {
    pool.and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.as_deref())
        == Some("Ready")
}

/// Gather the client keys, admin key and monitor endpoints.
async fn collect_keys(pass: &PassContext<'_>, clients: &[&str]) -> Result<OpenstackKeys, String> {
    let rook_ns = pass.rook_namespace();
    let stores = pass.stores;

    let mut missing = Vec::new();
    for client in clients {
        match stores.clients.get(client).await {
            Ok(Some(_)) => {}
            Ok(None) => missing.push(*client),
            Err(e) => {
                error!(client = %client, error = %e, "Failed to check CephClient");
                missing.push(*client);
            }
        }
    }
    if !missing.is_empty() {
        return Err(format!(
            "skip openstack secret ensure: no required ceph clients ({})",
            missing.join(", ")
        ));
    }

    let mut keys = OpenstackKeys::default();
    let mut errors = Vec::new();
    for client in clients {
        let command = format!("ceph auth get-key client.{client}");
        match stores.cli.run(&command).await {
            Ok(key) if key.trim().is_empty() => errors.push(format!("command '{command}' output is empty")),
            Ok(key) => {
                keys.client_keys.insert(client.to_string(), key.trim().to_string());
            }
            Err(e) => {
                error!(command = %command, error = %e, "Ceph command failed");
                errors.push(format!("failed to run '{command}' command"));
            }
        }
    }
    if !errors.is_empty() {
        errors.sort();
        return Err(format!(
            "failed to get auth keys for ceph clients: some auth keys failed to get: {}",
            errors.join(", ")
        ));
    }

    let mon_map = stores
        .config_maps
        .get(MON_ENDPOINTS_NAME)
        .await
        .map_err(|e| format!("failed to get ceph monitor endpoints: {e}"))?
        .ok_or_else(|| {
            format!("failed to get ceph monitor endpoints: configmap {rook_ns}/{MON_ENDPOINTS_NAME} is not found")
        })?;
    keys.mon_endpoints = mon_map
        .data
        .as_ref()
        .and_then(|d| d.get("data"))
        .cloned()
        .unwrap_or_default();

    let admin = stores
        .secrets
        .get(ADMIN_SECRET_NAME)
        .await
        .map_err(|e| format!("failed to get ceph admin secret: {e}"))?
        .ok_or_else(|| format!("failed to get ceph admin secret: secret {rook_ns}/{ADMIN_SECRET_NAME} is not found"))?;
    keys.admin_key = admin
        .data
        .as_ref()
        .and_then(|d| d.get(admin_key_field(pass.spec().external)))
        .map(|v| v.0.clone())
        .unwrap_or_default();
    Ok(keys)
}

/// Keep the shared secret in line with the OpenStack pools and clients.
pub async fn ensure_openstack_secret(pass: &PassContext<'_>) -> StepOutcome {
    let spec = pass.spec();
    if spec.disable_os_keys() {
        debug!(deployment = %pass.key(), "Openstack secret ensure disabled, skipping it");
        return Ok(false);
    }
    let pools: Vec<_> = spec.openstack_pools().collect();
    if pools.is_empty() {
        debug!(deployment = %pass.key(), "No OpenStack pools specified, skipping Openstack secret ensure");
        return Ok(false);
    }
    let shared_ns = pass.config.openstack_shared_namespace.as_str();

    let mut not_ready = Vec::new();
    for pool in pools {
        let name = pool.block_pool_name();
        let live = pass.stores.block_pools.get(&name).await.unwrap_or_else(|e| {
            error!(pool = %name, error = %e, "Failed to get CephBlockPool");
            None
        });
        if !pool_ready(live.as_ref()) {
            not_ready.push(name);
        }
    }
    if !not_ready.is_empty() {
        return Err(format!(
            "skip openstack secret ensure since the following required OpenStack pools are not ready yet: [{}]",
            not_ready.join(" ")
        ));
    }

    let clients = openstack_clients(spec.shared_filesystem.is_some());
    let keys = collect_keys(pass, &clients).await?;
    let desired = generate_openstack_secret(spec, &keys, pass.rook_namespace(), shared_ns);

    let store = pass.stores.shared_secrets.as_ref();
    let live = store
        .get(OPENSTACK_SECRET_NAME)
        .await
        .map_err(|e| format!("failed to get {shared_ns}/{OPENSTACK_SECRET_NAME} secret: {e}"))?;
    match live {
        None => {
            info!(namespace = %shared_ns, secret = OPENSTACK_SECRET_NAME, "Creating Openstack secret");
            store
                .create(&desired)
                .await
                .map_err(|e| format!("failed to create {shared_ns}/{OPENSTACK_SECRET_NAME} secret: {e}"))?;
            Ok(true)
        }
        Some(current) if current.data == desired.data => Ok(false),
        Some(mut current) => {
            info!(namespace = %shared_ns, secret = OPENSTACK_SECRET_NAME, "Updating Openstack secret");
            current.data = desired.data;
            store
                .update(&current)
                .await
                .map_err(|e| format!("failed to update {shared_ns}/{OPENSTACK_SECRET_NAME} secret: {e}"))?;
            Ok(true)
        }
    }
}

/// Remove the shared secret. `Ok(true)` once it is gone.
pub async fn delete_openstack_secret(stores: &Stores, shared_namespace: &str, disabled: bool) -> StepOutcome {
    if disabled {
        warn!(
            "openstack secret {shared_namespace}/{OPENSTACK_SECRET_NAME} ensure disabled, skip deleting. Do not forget to remove it manually"
        );
        return Ok(true);
    }
    match stores.shared_secrets.delete(OPENSTACK_SECRET_NAME).await {
        Ok(()) => {
            info!(namespace = %shared_namespace, secret = OPENSTACK_SECRET_NAME, "Removed openstack secret");
            Ok(false)
        }
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => Err(format!(
            "failed to delete openstack secret {shared_namespace}/{OPENSTACK_SECRET_NAME}: {e}"
        )),
    }
}
