//! Rook `ceph.rook.io/v1` child resources.
//!
//! Only the fields the operator writes or reads back are modelled. Rook owns
//! the rest of these schemas, so nothing here is ever installed as a CRD.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status block shared by the Rook kinds the operator waits on.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ========================================
// CephCluster
// ========================================

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephCluster",
    plural = "cephclusters",
    status = "CephClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterSpec {
    #[serde(default)]
    pub ceph_version: CephVersionSpec,
    #[serde(default)]
    pub data_dir_host_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ClusterNetworkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mon: Option<MonSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mgr: Option<ClusterMgrSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<DashboardSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageScopeSpec>,
    /// Per-daemon pod annotations (`all`, `mon`, `osd`, ...).
    #[serde(default)]
    pub annotations: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_policy: Option<CleanupPolicySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephVersionSpec {
    #[serde(default)]
    pub image: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkSpec {
    #[serde(default)]
    pub address_ranges: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonSpec {
    pub count: i32,
    #[serde(default)]
    pub allow_multiple_per_node: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMgrSpec {
    pub count: i32,
    #[serde(default)]
    pub modules: Vec<RookMgrModule>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookMgrModule {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSpec {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageScopeSpec {
    #[serde(default)]
    pub use_all_nodes: bool,
    #[serde(default)]
    pub use_all_devices: bool,
    #[serde(default)]
    pub nodes: Vec<RookNode>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookNode {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<RookDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_filter: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookDevice {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, rename = "fullpath", skip_serializing_if = "String::is_empty")]
    pub full_path: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPolicySpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub confirmation: String,
    #[serde(default)]
    pub allow_uninstall_with_volumes: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSpec {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ========================================
// Pools, clients, filesystems, mirroring
// ========================================

/// Pool layout used by CephBlockPool and embedded in other kinds.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookPoolSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated: Option<RookReplicatedSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erasure_coded: Option<RookErasureCodedSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirroring: Option<RookMirroringSpec>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookReplicatedSpec {
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_size_ratio: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookErasureCodedSpec {
    pub coding_chunks: u32,
    pub data_chunks: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub algorithm: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookMirroringSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephBlockPool",
    plural = "cephblockpools",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephBlockPoolSpec {
    /// Real pool name when it differs from the object name (builtin pools).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub pool: RookPoolSpec,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephClient",
    plural = "cephclients",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephClientResourceSpec {
    #[serde(default)]
    pub caps: BTreeMap<String, String>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephFilesystem",
    plural = "cephfilesystems",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephFilesystemSpec {
    #[serde(default)]
    pub metadata_pool: RookPoolSpec,
    #[serde(default)]
    pub data_pools: Vec<RookNamedPoolSpec>,
    #[serde(default)]
    pub preserve_filesystem_on_delete: bool,
    #[serde(default)]
    pub metadata_server: RookMetadataServerSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookNamedPoolSpec {
    pub name: String,
    #[serde(flatten)]
    pub pool: RookPoolSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookMetadataServerSpec {
    pub active_count: i32,
    #[serde(default)]
    pub active_standby: bool,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephRBDMirror",
    plural = "cephrbdmirrors",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephRbdMirrorSpec {
    pub count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<MirroringPeerSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MirroringPeerSpec {
    #[serde(default)]
    pub secret_names: Vec<String>,
}

// ========================================
// Object storage and multisite
// ========================================

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephObjectStore",
    plural = "cephobjectstores",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephObjectStoreSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_pool: Option<RookPoolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_pool: Option<RookPoolSpec>,
    #[serde(default)]
    pub preserve_pools_on_delete: bool,
    #[serde(default)]
    pub gateway: RookGatewaySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<RookZoneRef>,
    #[serde(default)]
    pub default_realm: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookGatewaySpec {
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub secure_port: i32,
    #[serde(default)]
    pub instances: i32,
    /// Pod annotations; used to roll gateways on config changes.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RookZoneRef {
    pub name: String,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephObjectRealm",
    plural = "cephobjectrealms",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephObjectRealmSpec {
    #[serde(default)]
    pub pull: RealmPullSpec,
    #[serde(default)]
    pub default_realm: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealmPullSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephObjectZoneGroup",
    plural = "cephobjectzonegroups",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephObjectZoneGroupSpec {
    pub realm: String,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephObjectZone",
    plural = "cephobjectzones",
    status = "RookStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephObjectZoneSpec {
    pub zone_group: String,
    #[serde(default)]
    pub metadata_pool: RookPoolSpec,
    #[serde(default)]
    pub data_pool: RookPoolSpec,
    #[serde(default)]
    pub custom_endpoints: Vec<String>,
    #[serde(default)]
    pub preserve_pools_on_delete: bool,
}
