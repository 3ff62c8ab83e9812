//! Common resource generation utilities.
//!
//! Names, labels and annotation keys shared by the generators, plus the
//! conversion from CephDeployment pool definitions into Rook pool specs.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{ErasureCodedSpec, PoolSpec, ReplicatedSpec};
use crate::crd::{RookErasureCodedSpec, RookPoolSpec, RookReplicatedSpec};

/// Ceph daemon roles a node can carry.
pub const CEPH_DAEMONS: [&str; 5] = ["mon", "mgr", "mds", "rgw", "osd"];

/// Label put on managed network policies.
pub const NETWORK_POLICY_LABEL: &str = "cephdeployment.lcm.mirantis.com/networkpolicy";
/// Label put on managed rbd mirror peer secrets.
pub const RBD_MIRROR_SECRET_LABEL: &str = "cephdeployment.lcm.mirantis.com/rbd-mirror-peer";

/// Label marking storage classes managed by the operator.
pub const STORAGE_CLASS_LABEL: &str = "rook-ceph-storage-class";
/// Label keeping a managed storage class after it leaves the spec.
pub const STORAGE_CLASS_KEEP_LABEL: &str = "rook-ceph-storage-class-keep-on-spec-remove";
pub const DEFAULT_STORAGE_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
pub const RBD_PROVISIONER: &str = "rook-ceph.rbd.csi.ceph.com";
pub const CEPHFS_PROVISIONER: &str = "rook-ceph.cephfs.csi.ceph.com";

/// ConfigMap holding the rendered ceph.conf override.
pub const CONFIG_OVERRIDE_NAME: &str = "rook-config-override";
/// ConfigMap Rook creates once monitors are up.
pub const MON_ENDPOINTS_NAME: &str = "rook-ceph-mon-endpoints";
/// Connection details an external deployment was created from, in the deployment namespace.
pub const EXTERNAL_CONNECTION_SECRET_NAME: &str = "pelagia-external-connection";

/// Node annotation pinning a monitor IP.
pub const MON_IP_ANNOTATION: &str = "network.rook.io/mon-ip";
/// Node label put by the csi daemonsets.
pub const DAEMONSET_NODE_LABEL: &str = "ceph-daemonset-available-node";

/// CephFS subvolumegroup used by the CSI driver.
pub const CSI_SUBVOLUME_GROUP: &str = "csi";

/// `ceph_role_<daemon>` node label.
pub fn node_role_label(daemon: &str) -> String {
    format!("ceph_role_{daemon}")
}

/// Crush topology keys accepted in a node `crush` section.
pub const CRUSH_TOPOLOGY_KEYS: [&str; 8] = [
    "datacenter",
    "room",
    "pdu",
    "row",
    "rack",
    "chassis",
    "region",
    "zone",
];

/// Node label for a crush topology key, if the key is supported.
pub fn crush_topology_label(key: &str) -> Option<&'static str> {
    match key {
        "datacenter" => Some("topology.rook.io/datacenter"),
        "room" => Some("topology.rook.io/room"),
        "pdu" => Some("topology.rook.io/pdu"),
        "row" => Some("topology.rook.io/row"),
        "rack" => Some("topology.rook.io/rack"),
        "chassis" => Some("topology.rook.io/chassis"),
        "region" => Some("topology.kubernetes.io/region"),
        "zone" => Some("topology.kubernetes.io/zone"),
        _ => None,
    }
}

/// `rook-ceph-rgw-<name>[-<suffix>]`.
pub fn rgw_resource_name(rgw: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("rook-ceph-rgw-{rgw}-{suffix}"),
        None => format!("rook-ceph-rgw-{rgw}"),
    }
}

/// Metadata for a namespaced child.
pub fn child_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Single-entry label or annotation map.
pub fn single(key: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.to_string())])
}

fn rook_replicated(spec: &ReplicatedSpec, default_ratio: Option<f64>) -> RookReplicatedSpec {
    RookReplicatedSpec {
        size: spec.size,
        target_size_ratio: spec.target_size_ratio.or(default_ratio),
    }
}

fn rook_erasure_coded(spec: &ErasureCodedSpec) -> RookErasureCodedSpec {
    RookErasureCodedSpec {
        coding_chunks: spec.coding_chunks,
        data_chunks: spec.data_chunks,
        algorithm: spec.algorithm.clone().unwrap_or_default(),
    }
}

/// Rook pool layout for a CephDeployment pool definition.
///
/// `default_ratio` fills `targetSizeRatio` of replicated pools when unset.
pub fn rook_pool_spec(pool: &PoolSpec, default_ratio: Option<f64>) -> RookPoolSpec {
    RookPoolSpec {
        failure_domain: pool.failure_domain.clone().unwrap_or_default(),
        device_class: pool.device_class.clone(),
        replicated: pool
            .replicated
            .as_ref()
            .map(|r| rook_replicated(r, default_ratio)),
        erasure_coded: pool.erasure_coded.as_ref().map(rook_erasure_coded),
        mirroring: None,
        parameters: pool.parameters.clone(),
    }
}
