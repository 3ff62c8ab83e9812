//! Ensure and delete steps for children converged directly by the Differ.
//!
//! Network policies, block pools, clients and RBD mirroring have no ordering
//! between their items, so each step is one [`converge`] call (two for
//! mirroring: the daemon and its peer secrets).

use tracing::{debug, info};

use crate::controller::differ::{DiffScope, ObjectProcess, StepOutcome, combine, converge, process};
use crate::controller::pass::PassContext;
use crate::crd::CephBlockPool;
use crate::resources::clients::{generate_clients, generate_peer_secrets, generate_rbd_mirror};
use crate::resources::common::RBD_MIRROR_SECRET_LABEL;
use crate::resources::network_policies::{desired_network_policies, managed_selector};
use crate::resources::pools::generate_block_pools;
use crate::store::Stores;

/// Pool kept by block pool teardown; object storage removes it last.
const RGW_ROOT_POOL: &str = ".rgw.root";

fn peer_secret_selector() -> String {
    format!("{RBD_MIRROR_SECRET_LABEL}=true")
}

/// `network policies` step. Managed policies are removed when disabled.
pub async fn ensure_network_policies(pass: &PassContext<'_>) -> StepOutcome {
    let desired = if pass.config.network_policies {
        desired_network_policies(pass.spec(), pass.rook_namespace())
    } else {
        Vec::new()
    };
    let selector = managed_selector();
    let scope = DiffScope {
        kinds: "NetworkPolicies",
        namespace: pass.rook_namespace(),
        selector: Some(&selector),
    };
    converge(pass.stores.network_policies.as_ref(), &scope, desired).await
}

pub async fn delete_network_policies(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let selector = managed_selector();
    let scope = DiffScope {
        kinds: "NetworkPolicies",
        namespace: rook_namespace,
        selector: Some(&selector),
    };
    converge(stores.network_policies.as_ref(), &scope, Vec::new())
        .await
        .map(|changed| !changed)
}

/// `cephblockpools` step.
pub async fn ensure_block_pools(pass: &PassContext<'_>) -> StepOutcome {
    let scope = DiffScope {
        kinds: "CephBlockPools",
        namespace: pass.rook_namespace(),
        selector: None,
    };
    let desired = generate_block_pools(&pass.spec().pools, pass.rook_namespace());
    converge(pass.stores.block_pools.as_ref(), &scope, desired).await
}

fn is_rgw_root(pool: &CephBlockPool) -> bool {
    pool.spec.name.as_deref() == Some(RGW_ROOT_POOL)
}

/// Delete every block pool except `.rgw.root`.
///
/// Ignores preserve marks: the whole cluster is going away.
pub async fn delete_block_pools(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let store = stores.block_pools.as_ref();
    let pools = store
        .list(None)
        .await
        .map_err(|e| format!("failed to list CephBlockPools: {e}"))?;
    let pools: Vec<CephBlockPool> = pools.into_iter().filter(|p| !is_rgw_root(p)).collect();
    if pools.is_empty() {
        return Ok(true);
    }
    let mut errors = Vec::new();
    for pool in &pools {
        info!(pool = ?pool.metadata.name, "Removing CephBlockPool");
        if let Err(e) = process(store, ObjectProcess::Delete, pool, rook_namespace).await {
            errors.push(e);
        }
    }
    match errors.as_slice() {
        [] => Ok(false),
        [single] => Err(single.clone()),
        _ => Err("multiple errors during CephBlockPools removal".to_string()),
    }
}

/// `cephclients` step.
pub async fn ensure_clients(pass: &PassContext<'_>) -> StepOutcome {
    let scope = DiffScope {
        kinds: "CephClients",
        namespace: pass.rook_namespace(),
        selector: None,
    };
    let desired = generate_clients(&pass.spec().clients, pass.rook_namespace());
    converge(pass.stores.clients.as_ref(), &scope, desired).await
}

pub async fn delete_clients(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let scope = DiffScope {
        kinds: "CephClients",
        namespace: rook_namespace,
        selector: None,
    };
    converge(stores.clients.as_ref(), &scope, Vec::new())
        .await
        .map(|changed| !changed)
}

/// `RBD Mirroring` step: the daemon named after the deployment plus one
/// bootstrap secret per peer pool.
pub async fn ensure_rbd_mirror(pass: &PassContext<'_>) -> StepOutcome {
    let Some(mirror) = pass.spec().rbd_mirror.as_ref() else {
        debug!("RBD mirroring is not configured");
        return delete_rbd_mirror(pass.stores, pass.rook_namespace())
            .await
            .map(|removed| !removed);
    };
    let rook_ns = pass.rook_namespace();
    let mirrors = converge(
        pass.stores.rbd_mirrors.as_ref(),
        &DiffScope {
            kinds: "CephRBDMirrors",
            namespace: rook_ns,
            selector: None,
        },
        vec![generate_rbd_mirror(&pass.name, mirror, rook_ns)],
    )
    .await;
    let selector = peer_secret_selector();
    let secrets = converge(
        pass.stores.secrets.as_ref(),
        &DiffScope {
            kinds: "RBDMirror peer secrets",
            namespace: rook_ns,
            selector: Some(&selector),
        },
        generate_peer_secrets(mirror, rook_ns),
    )
    .await;
    combine("rbd mirror", [mirrors, secrets])
}

pub async fn delete_rbd_mirror(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let mirrors = converge(
        stores.rbd_mirrors.as_ref(),
        &DiffScope {
            kinds: "CephRBDMirrors",
            namespace: rook_namespace,
            selector: None,
        },
        Vec::new(),
    )
    .await;
    let selector = peer_secret_selector();
    let secrets = converge(
        stores.secrets.as_ref(),
        &DiffScope {
            kinds: "RBDMirror peer secrets",
            namespace: rook_namespace,
            selector: Some(&selector),
        },
        Vec::new(),
    )
    .await;
    combine("rbd mirror", [mirrors, secrets]).map(|changed| !changed)
}
