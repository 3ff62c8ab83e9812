//! CephBlockPool generation.

use crate::crd::{
    CephBlockPool, CephBlockPoolSpec, CephPool, PoolSpec, RookMirroringSpec, BUILTIN_POOLS,
};
use crate::resources::common::{child_meta, rook_pool_spec, single};
use crate::controller::differ::PRESERVE_ANNOTATION;

/// Default `targetSizeRatio` for replicated pools by OpenStack role.
pub fn default_target_size_ratio(role: &str) -> Option<f64> {
    match role {
        "images" | "backup" | "rgw data" => Some(0.1),
        "volumes" => Some(0.4),
        "vms" => Some(0.2),
        _ => None,
    }
}

fn pool_layout(pool: &CephPool) -> PoolSpec {
    PoolSpec {
        device_class: pool.device_class.clone(),
        failure_domain: pool.failure_domain.clone(),
        replicated: pool.replicated.clone(),
        erasure_coded: pool.erasure_coded.clone(),
        parameters: pool.parameters.clone(),
    }
}

/// CephBlockPool for one spec pool.
pub fn generate_block_pool(pool: &CephPool, rook_namespace: &str) -> CephBlockPool {
    let mut rook_pool = rook_pool_spec(&pool_layout(pool), default_target_size_ratio(&pool.role));
    rook_pool.mirroring = pool
        .mirroring
        .as_ref()
        .filter(|m| m.mode == "pool" || m.mode == "image")
        .map(|m| RookMirroringSpec {
            enabled: true,
            mode: m.mode.clone(),
        });

    let ceph_name = pool.ceph_pool_name();
    let mut meta = child_meta(&pool.block_pool_name(), rook_namespace);
    if pool.preserve_on_delete {
        meta.annotations = Some(single(PRESERVE_ANNOTATION, "true"));
    }
    CephBlockPool {
        metadata: meta,
        spec: CephBlockPoolSpec {
            name: BUILTIN_POOLS
                .contains(&ceph_name.as_str())
                .then_some(ceph_name),
            pool: rook_pool,
        },
        status: None,
    }
}

/// Desired CephBlockPools of a deployment.
pub fn generate_block_pools(pools: &[CephPool], rook_namespace: &str) -> Vec<CephBlockPool> {
    pools
        .iter()
        .map(|p| generate_block_pool(p, rook_namespace))
        .collect()
}

/// Override for a builtin pool (`.mgr`, `.rgw.root`) that follows `layout`.
pub fn generate_builtin_pool(name: &str, layout: &PoolSpec, rook_namespace: &str) -> CephBlockPool {
    let pool = CephPool {
        name: name.to_string(),
        use_as_full_name: true,
        device_class: layout.device_class.clone(),
        failure_domain: layout.failure_domain.clone(),
        replicated: layout.replicated.clone(),
        erasure_coded: layout.erasure_coded.clone(),
        parameters: layout.parameters.clone(),
        ..Default::default()
    };
    generate_block_pool(&pool, rook_namespace)
}
