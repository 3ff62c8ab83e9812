//! CSI StorageClass generation for RBD pools and CephFS data pools.

use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{CephFsSpec, CephPool, StorageClassOpts};
use crate::resources::common::{
    CEPHFS_PROVISIONER, DEFAULT_STORAGE_CLASS_ANNOTATION, RBD_PROVISIONER, STORAGE_CLASS_KEEP_LABEL,
    STORAGE_CLASS_LABEL, single,
};
use crate::resources::filesystems::cephfs_storage_class_name;

const DEFAULT_IMAGE_FEATURES: &str = "layering";

fn csi_secrets(params: &mut BTreeMap<String, String>, driver: &str, namespace: &str, expand: bool) {
    let provisioner = format!("rook-csi-{driver}-provisioner");
    let node = format!("rook-csi-{driver}-node");
    let mut put = |key: &str, value: &str| {
        params.insert(format!("csi.storage.k8s.io/{key}"), value.to_string());
    };
    put("provisioner-secret-name", &provisioner);
    put("provisioner-secret-namespace", namespace);
    put("node-stage-secret-name", &node);
    put("node-stage-secret-namespace", namespace);
    if expand {
        put("controller-expand-secret-name", &provisioner);
        put("controller-expand-secret-namespace", namespace);
    }
}

/// RBD StorageClass named after the pool.
///
/// External clusters always allow expansion.
pub fn generate_rbd_storage_class(
    pool: &CephPool,
    opts: &StorageClassOpts,
    external: bool,
    rook_namespace: &str,
) -> StorageClass {
    let pool_name = pool.ceph_pool_name();
    let expansion = opts.allow_volume_expansion || external;

    let mut params = BTreeMap::from([
        ("clusterID".to_string(), rook_namespace.to_string()),
        ("pool".to_string(), pool_name.clone()),
        ("imageFormat".to_string(), "2".to_string()),
    ]);
    csi_secrets(&mut params, "rbd", rook_namespace, expansion);
    if expansion {
        params.insert("csi.storage.k8s.io/fstype".to_string(), "ext4".to_string());
    }
    if let Some(map_options) = opts.map_options.as_ref().filter(|o| !o.is_empty()) {
        params.insert("mapOptions".to_string(), map_options.clone());
    }
    params.insert(
        "imageFeatures".to_string(),
        opts.image_features
            .clone()
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_FEATURES.to_string()),
    );

    StorageClass {
        metadata: ObjectMeta {
            name: Some(pool_name),
            labels: Some(single(STORAGE_CLASS_LABEL, "true")),
            annotations: Some(single(
                DEFAULT_STORAGE_CLASS_ANNOTATION,
                &opts.default.to_string(),
            )),
            ..Default::default()
        },
        provisioner: RBD_PROVISIONER.to_string(),
        parameters: Some(params),
        allow_volume_expansion: expansion.then_some(true),
        reclaim_policy: opts.reclaim_policy.clone().filter(|p| !p.is_empty()),
        ..Default::default()
    }
}

/// CephFS StorageClass for one data pool of a filesystem.
pub fn generate_cephfs_storage_class(fs: &CephFsSpec, data_pool: &str, rook_namespace: &str) -> StorageClass {
    let mut params = BTreeMap::from([
        ("clusterID".to_string(), rook_namespace.to_string()),
        ("pool".to_string(), format!("{}-{data_pool}", fs.name)),
        ("fsName".to_string(), fs.name.clone()),
    ]);
    csi_secrets(&mut params, "cephfs", rook_namespace, true);

    StorageClass {
        metadata: ObjectMeta {
            name: Some(cephfs_storage_class_name(&fs.name, data_pool)),
            labels: Some(BTreeMap::from([
                (STORAGE_CLASS_LABEL.to_string(), "true".to_string()),
                (
                    STORAGE_CLASS_KEEP_LABEL.to_string(),
                    fs.preserve_filesystem_on_delete.to_string(),
                ),
            ])),
            ..Default::default()
        },
        provisioner: CEPHFS_PROVISIONER.to_string(),
        parameters: Some(params),
        allow_volume_expansion: Some(true),
        reclaim_policy: Some("Delete".to_string()),
        ..Default::default()
    }
}

/// Every StorageClass the deployment asks for.
pub fn desired_storage_classes(
    pools: &[CephPool],
    filesystems: &[CephFsSpec],
    external: bool,
    rook_namespace: &str,
) -> Vec<StorageClass> {
    let rbd = pools.iter().filter_map(|pool| {
        pool.storage_class_opts
            .as_ref()
            .map(|opts| generate_rbd_storage_class(pool, opts, external, rook_namespace))
    });
    let cephfs = filesystems.iter().flat_map(|fs| {
        fs.data_pools
            .iter()
            .map(move |p| generate_cephfs_storage_class(fs, &p.name, rook_namespace))
    });
    rbd.chain(cephfs).collect()
}

/// Labels and annotations the operator owns on an existing class.
///
/// Returns the class with them applied, or `None` when nothing differs.
pub fn sync_metadata(live: &StorageClass, desired: &StorageClass) -> Option<StorageClass> {
    let mut updated = live.clone();
    let mut changed = false;
    for (field, want) in [
        (&mut updated.metadata.labels, desired.metadata.labels.as_ref()),
        (
            &mut updated.metadata.annotations,
            desired.metadata.annotations.as_ref(),
        ),
    ] {
        let Some(want) = want else {
            continue;
        };
        let have = field.get_or_insert_with(BTreeMap::new);
        for (key, value) in want {
            if have.get(key) != Some(value) {
                have.insert(key.clone(), value.clone());
                changed = true;
            }
        }
    }
    changed.then_some(updated)
}

/// Whether a live class may be removed once it leaves the spec.
pub fn is_removable(sc: &StorageClass) -> bool {
    let labels = sc.metadata.labels.as_ref();
    let label = |key: &str| labels.and_then(|l| l.get(key)).map(String::as_str);
    label(STORAGE_CLASS_LABEL) == Some("true") && label(STORAGE_CLASS_KEEP_LABEL) != Some("true")
}
