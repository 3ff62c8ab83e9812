//! CephDeployment Custom Resource Definition.
//!
//! A CephDeployment is the single high-level description of a Ceph cluster.
//! The operator converges it into Rook child resources in the Rook namespace
//! and reports progress through `.status`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Builtin Ceph pools that need a sanitized CephBlockPool name.
pub const BUILTIN_POOLS: [&str; 2] = [".mgr", ".rgw.root"];

/// CephDeployment describes a Ceph cluster managed through Rook.
///
/// Example:
/// ```yaml
/// apiVersion: lcm.mirantis.com/v1alpha1
/// kind: CephDeployment
/// metadata:
///   name: ceph
///   namespace: ceph-lcm
/// spec:
///   network:
///     clusterNet: 10.0.0.0/24
///     publicNet: 10.0.1.0/24
///   nodes:
///     - name: node-1
///       roles: [mon, mgr]
///       devices:
///         - name: sdb
///   pools:
///     - name: kubernetes
///       deviceClass: hdd
///       replicated:
///         size: 3
///       storageClassOpts:
///         default: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lcm.mirantis.com",
    version = "v1alpha1",
    kind = "CephDeployment",
    plural = "cephdeployments",
    shortname = "cephdpl",
    status = "CephDeploymentStatus",
    namespaced,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Message", "type":"string", "jsonPath":".status.message"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.clusterVersion"}"#,
    printcolumn = r#"{"name":"Validation", "type":"string", "jsonPath":".status.validation.result"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CephDeploymentSpec {
    /// Enable the Ceph dashboard mgr module.
    #[serde(default)]
    pub dashboard: bool,

    /// Connect to an externally managed Ceph cluster instead of deploying one.
    #[serde(default)]
    pub external: bool,

    /// Host path for Ceph daemon data (default: /var/lib/rook).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir_host_path: Option<String>,

    /// Cluster and public networks.
    #[serde(default)]
    pub network: NetworkSpec,

    /// Nodes (or node groups) taking part in the cluster.
    #[serde(default)]
    pub nodes: Vec<CephDeploymentNode>,

    /// RBD pools. Pools with storageClassOpts also get a StorageClass.
    #[serde(default)]
    pub pools: Vec<CephPool>,

    /// Ceph client users.
    #[serde(default)]
    pub clients: Vec<CephClientSpec>,

    /// RADOS gateway and multisite configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage: Option<ObjectStorageSpec>,

    /// CephFS configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_filesystem: Option<SharedFilesystemSpec>,

    /// RBD mirroring daemons and peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbd_mirror: Option<RbdMirrorSpec>,

    /// Ingress for the object storage public endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_config: Option<IngressConfig>,

    /// Raw Ceph configuration, keyed as `section|option` or `option` (global).
    #[serde(default)]
    pub rook_config: BTreeMap<String, String>,

    /// Ceph manager modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mgr: Option<MgrSpec>,

    /// Options that do not fit elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_opts: Option<ExtraOpts>,
}

impl CephDeploymentSpec {
    /// The pool marked as the default storage class, if any.
    pub fn default_pool(&self) -> Option<&CephPool> {
        self.pools
            .iter()
            .find(|p| p.storage_class_opts.as_ref().is_some_and(|o| o.default))
    }

    /// Whether the cluster deletion is blocked by the user.
    pub fn prevent_cluster_destroy(&self) -> bool {
        self.extra_opts
            .as_ref()
            .is_some_and(|o| o.prevent_cluster_destroy)
    }

    pub fn disable_os_keys(&self) -> bool {
        self.extra_opts.as_ref().is_some_and(|o| o.disable_os_keys)
    }

    /// Pools serving an OpenStack role.
    pub fn openstack_pools(&self) -> impl Iterator<Item = &CephPool> {
        self.pools
            .iter()
            .filter(|p| OPENSTACK_POOL_ROLES.contains(&p.role.as_str()))
    }
}

/// Pool roles consumed by OpenStack services.
pub const OPENSTACK_POOL_ROLES: [&str; 4] = ["images", "vms", "backup", "volumes"];

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub cluster_net: String,
    #[serde(default)]
    pub public_net: String,
}

/// A node, a group of nodes sharing one definition, or a label selector.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephDeploymentNode {
    /// Node name, or the group name when nodeGroup/nodesByLabel is set.
    #[serde(default)]
    pub name: String,

    /// Ceph daemon roles (mon, mgr, mds, rgw).
    #[serde(default)]
    pub roles: Vec<String>,

    /// CRUSH topology, e.g. `rack: r1`.
    #[serde(default)]
    pub crush: BTreeMap<String, String>,

    /// Explicit node names sharing this definition.
    #[serde(default)]
    pub node_group: Vec<String>,

    /// Label selector selecting nodes sharing this definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_by_label: Option<String>,

    /// Monitor IP annotation value.
    #[serde(default, rename = "monitorIP", skip_serializing_if = "Option::is_none")]
    pub monitor_ip: Option<String>,

    /// Storage devices for OSDs.
    #[serde(default)]
    pub devices: Vec<NodeDevice>,

    /// Regex filter selecting devices for OSDs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_filter: Option<String>,

    /// Per-node OSD config (osdsPerDevice, deviceClass, metadataDevice).
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Not supported; rejected by validation.
    #[serde(default)]
    pub use_all_devices: bool,
}

impl CephDeploymentNode {
    /// Whether the node runs OSDs.
    pub fn is_osd_node(&self) -> bool {
        !self.devices.is_empty() || self.device_filter.is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDevice {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// RBD pool definition.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephPool {
    pub name: String,

    /// Use `name` verbatim instead of `<name>-<deviceClass>`.
    #[serde(default)]
    pub use_as_full_name: bool,

    /// OpenStack role (images, vms, volumes, backup) or free form.
    #[serde(default)]
    pub role: String,

    /// Keep the CephBlockPool when the pool disappears from the spec.
    #[serde(default)]
    pub preserve_on_delete: bool,

    #[serde(default)]
    pub device_class: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated: Option<ReplicatedSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erasure_coded: Option<ErasureCodedSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirroring: Option<MirroringSpec>,

    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_opts: Option<StorageClassOpts>,
}

impl CephPool {
    /// Name of the Ceph pool (and its CephBlockPool before sanitizing).
    pub fn ceph_pool_name(&self) -> String {
        if self.use_as_full_name {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.device_class)
        }
    }

    /// CephBlockPool object name; builtin pools get a DNS-safe name.
    pub fn block_pool_name(&self) -> String {
        let name = self.ceph_pool_name();
        if BUILTIN_POOLS.contains(&name.as_str()) {
            builtin_pool_object_name(&name)
        } else {
            name
        }
    }
}

/// `.rgw.root` -> `builtin-rgw-root`, `.mgr` -> `builtin-mgr`.
pub fn builtin_pool_object_name(name: &str) -> String {
    if let Some(stripped) = name.strip_prefix('.') {
        format!("builtin-{}", stripped.replace('.', "-"))
    } else {
        format!("builtin-{}", name.replace('_', "-"))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedSpec {
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_size_ratio: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErasureCodedSpec {
    pub coding_chunks: u32,
    pub data_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MirroringSpec {
    #[serde(default)]
    pub mode: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassOpts {
    /// Mark the StorageClass as cluster default.
    #[serde(default)]
    pub default: bool,
    /// Retain or Delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<String>,
    #[serde(default)]
    pub allow_volume_expansion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_options: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_features: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephClientSpec {
    pub name: String,
    #[serde(default)]
    pub caps: BTreeMap<String, String>,
}

/// Object storage: one RADOS gateway plus optional multisite.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageSpec {
    pub rgw: RgwSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_site: Option<MultiSiteSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RgwSpec {
    pub name: String,
    #[serde(default)]
    pub preserve_pools_on_delete: bool,
    #[serde(default)]
    pub gateway: GatewaySpec,
    /// Required unless the gateway joins a multisite zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_pool: Option<PoolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_pool: Option<PoolSpec>,
    /// Multisite zone served by this gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneRef>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    #[serde(default = "default_gateway_port")]
    pub port: i32,
    #[serde(default = "default_gateway_secure_port")]
    pub secure_port: i32,
    #[serde(default = "default_gateway_instances")]
    pub instances: i32,
}

impl Default for GatewaySpec {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            secure_port: default_gateway_secure_port(),
            instances: default_gateway_instances(),
        }
    }
}

fn default_gateway_port() -> i32 {
    80
}

fn default_gateway_secure_port() -> i32 {
    8443
}

fn default_gateway_instances() -> i32 {
    2
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRef {
    pub name: String,
}

/// Pool definition shared by gateways, zones and filesystems.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(default)]
    pub device_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated: Option<ReplicatedSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erasure_coded: Option<ErasureCodedSpec>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiSiteSpec {
    #[serde(default)]
    pub realms: Vec<RealmSpec>,
    #[serde(default)]
    pub zone_groups: Vec<ZoneGroupSpec>,
    #[serde(default)]
    pub zones: Vec<ZoneSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealmSpec {
    pub name: String,
    /// Pull the realm from a master zone of another cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_endpoint: Option<PullEndpoint>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullEndpoint {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneGroupSpec {
    pub name: String,
    pub realm_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSpec {
    pub name: String,
    pub zone_group_name: String,
    #[serde(default)]
    pub metadata_pool: PoolSpec,
    #[serde(default)]
    pub data_pool: PoolSpec,
    /// Explicit endpoints; derived from ingress or the external service otherwise.
    #[serde(default)]
    pub endpoints_for_zone: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SharedFilesystemSpec {
    #[serde(default, rename = "cephFS")]
    pub ceph_fs: Vec<CephFsSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephFsSpec {
    pub name: String,
    #[serde(default)]
    pub metadata_pool: PoolSpec,
    #[serde(default)]
    pub data_pools: Vec<NamedPoolSpec>,
    #[serde(default)]
    pub preserve_filesystem_on_delete: bool,
    #[serde(default)]
    pub metadata_server: MetadataServerSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamedPoolSpec {
    pub name: String,
    #[serde(flatten)]
    pub pool: PoolSpec,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataServerSpec {
    #[serde(default = "default_mds_active_count")]
    pub active_count: i32,
    #[serde(default)]
    pub active_standby: bool,
}

impl Default for MetadataServerSpec {
    fn default() -> Self {
        Self {
            active_count: default_mds_active_count(),
            active_standby: false,
        }
    }
}

fn default_mds_active_count() -> i32 {
    1
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RbdMirrorSpec {
    #[serde(default = "default_rbd_mirror_daemons")]
    pub daemons_count: i32,
    #[serde(default)]
    pub peers: Vec<RbdMirrorPeer>,
}

fn default_rbd_mirror_daemons() -> i32 {
    1
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RbdMirrorPeer {
    pub site: String,
    pub token: String,
    #[serde(default)]
    pub pools: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_class_name: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<IngressTlsConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressTlsConfig {
    pub public_domain: String,
    /// Overrides the rgw name as the public host prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_ref_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MgrSpec {
    #[serde(default)]
    pub mgr_modules: Vec<MgrModule>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MgrModule {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtraOpts {
    /// Device label -> by-path or device name, per node.
    #[serde(default)]
    pub device_labels: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub custom_device_classes: Vec<String>,
    #[serde(default)]
    pub enable_progress_events: bool,
    #[serde(default)]
    pub prevent_cluster_destroy: bool,
    /// Do not manage the secret shared with OpenStack services.
    #[serde(default)]
    pub disable_os_keys: bool,
}

/// Status of a CephDeployment, replaced as a whole on every pass.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephDeploymentStatus {
    #[serde(default)]
    pub phase: DeploymentPhase,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub validation: ValidationStatus,

    /// Running Ceph version, e.g. `v19.2.3`.
    #[serde(default)]
    pub cluster_version: String,

    /// Timestamp of the last status write.
    #[serde(default)]
    pub last_run: String,

    /// References to the companion objects.
    #[serde(default)]
    pub obj_refs: Vec<ObjectRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ValidationResult>,
    #[serde(default)]
    pub last_validated_generation: i64,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ValidationResult {
    Succeed,
    Failed,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// DeploymentPhase represents the lifecycle phase of a CephDeployment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum DeploymentPhase {
    /// Nothing has been reported yet.
    #[default]
    Creating,
    /// Child resources are being created or updated.
    Deploying,
    /// Configuration is applied and nothing is pending.
    Ready,
    /// A node removal task holds the reconcile.
    OnHold,
    /// A maintenance lock holds the reconcile.
    Maintenance,
    /// Child resources are being removed.
    Deleting,
    /// Validation failed or the apply kept failing.
    Failed,
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentPhase::Creating => write!(f, "Creating"),
            DeploymentPhase::Deploying => write!(f, "Deploying"),
            DeploymentPhase::Ready => write!(f, "Ready"),
            DeploymentPhase::OnHold => write!(f, "OnHold"),
            DeploymentPhase::Maintenance => write!(f, "Maintenance"),
            DeploymentPhase::Deleting => write!(f, "Deleting"),
            DeploymentPhase::Failed => write!(f, "Failed"),
        }
    }
}
