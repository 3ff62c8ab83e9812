//! CephFilesystem generation.

use crate::crd::{
    CephFilesystem, CephFilesystemSpec, CephFsSpec, RookMetadataServerSpec, RookNamedPoolSpec,
};
use crate::resources::common::{child_meta, rook_pool_spec};

/// Storage class name of a CephFS data pool.
///
/// The first data pool, conventionally `data0`, gets the short `<fs>-cephfs`.
pub fn cephfs_storage_class_name(fs: &str, data_pool: &str) -> String {
    if data_pool == "data0" {
        format!("{fs}-cephfs")
    } else {
        format!("{fs}-{data_pool}")
    }
}

pub fn generate_filesystem(fs: &CephFsSpec, rook_namespace: &str) -> CephFilesystem {
    CephFilesystem {
        metadata: child_meta(&fs.name, rook_namespace),
        spec: CephFilesystemSpec {
            metadata_pool: rook_pool_spec(&fs.metadata_pool, None),
            data_pools: fs
                .data_pools
                .iter()
                .map(|p| RookNamedPoolSpec {
                    name: p.name.clone(),
                    pool: rook_pool_spec(&p.pool, None),
                })
                .collect(),
            preserve_filesystem_on_delete: fs.preserve_filesystem_on_delete,
            metadata_server: RookMetadataServerSpec {
                active_count: fs.metadata_server.active_count,
                active_standby: fs.metadata_server.active_standby,
            },
        },
        status: None,
    }
}
