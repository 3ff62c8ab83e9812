//! CephCluster generation.

use std::collections::BTreeMap;

use crate::crd::{
    CephCluster, CephClusterSpec, CephDeploymentNode, CephDeploymentSpec, CephVersionSpec,
    ClusterMgrSpec, ClusterNetworkSpec, DashboardSpec, ExternalSpec, MonSpec, RookDevice,
    RookMgrModule, RookNode, StorageScopeSpec,
};
use crate::resources::ceph_config::updated_annotation;
use crate::resources::common::child_meta;

/// Host path used when the spec leaves it empty.
pub const DEFAULT_DATA_DIR_HOST_PATH: &str = "/var/lib/rook";
/// Rook runs at most two managers.
const MAX_MGR_COUNT: i32 = 2;
const DEFAULT_MGR_MODULES: [&str; 2] = ["balancer", "pg_autoscaler"];

fn has_role(node: &CephDeploymentNode, role: &str) -> bool {
    node.roles.iter().any(|r| r == role)
}

fn split_nets(nets: &str) -> Vec<String> {
    nets.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

fn storage_nodes(nodes: &[CephDeploymentNode]) -> Vec<RookNode> {
    nodes
        .iter()
        .filter(|n| n.is_osd_node())
        .map(|n| RookNode {
            name: n.name.clone(),
            devices: n
                .devices
                .iter()
                .map(|d| RookDevice {
                    name: d.name.clone(),
                    full_path: d.full_path.clone().unwrap_or_default(),
                    config: d.config.clone(),
                })
                .collect(),
            device_filter: n.device_filter.clone(),
            config: n.config.clone(),
        })
        .collect()
}

fn mgr_modules(spec: &CephDeploymentSpec) -> Vec<RookMgrModule> {
    let mut modules: Vec<RookMgrModule> = spec
        .mgr
        .as_ref()
        .map(|m| {
            m.mgr_modules
                .iter()
                .map(|module| RookMgrModule {
                    name: module.name.clone(),
                    enabled: module.enabled,
                })
                .collect()
        })
        .unwrap_or_default();
    for default in DEFAULT_MGR_MODULES {
        if !modules.iter().any(|m| m.name == default) {
            modules.push(RookMgrModule {
                name: default.to_string(),
                enabled: true,
            });
        }
    }
    modules
}

/// Daemon pod annotations carrying the config section timestamps.
///
/// mon and mgr always follow the global section, plus their own.
fn daemon_annotations(timestamps: &BTreeMap<String, String>) -> BTreeMap<String, BTreeMap<String, String>> {
    let global = timestamps.get("global").cloned().unwrap_or_default();
    let mut annotations = BTreeMap::new();
    for daemon in ["mon", "mgr"] {
        let mut entry = BTreeMap::from([(updated_annotation("global"), global.clone())]);
        if let Some(ts) = timestamps.get(daemon).filter(|ts| !ts.is_empty()) {
            entry.insert(updated_annotation(daemon), ts.clone());
        }
        annotations.insert(daemon.to_string(), entry);
    }
    annotations
}

/// Build the CephCluster spec for the expanded node list.
pub fn generate_cluster_spec(
    spec: &CephDeploymentSpec,
    image: &str,
    nodes: &[CephDeploymentNode],
    timestamps: &BTreeMap<String, String>,
) -> CephClusterSpec {
    let data_dir_host_path = spec
        .data_dir_host_path
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_DATA_DIR_HOST_PATH.to_string());

    if spec.external {
        return CephClusterSpec {
            ceph_version: CephVersionSpec {
                image: image.to_string(),
            },
            data_dir_host_path,
            external: Some(ExternalSpec { enable: true }),
            ..Default::default()
        };
    }

    let mon_count = nodes.iter().filter(|n| has_role(n, "mon")).count() as i32;
    let mgr_count = (nodes.iter().filter(|n| has_role(n, "mgr")).count() as i32).min(MAX_MGR_COUNT);

    let mut address_ranges = BTreeMap::new();
    let public = split_nets(&spec.network.public_net);
    if !public.is_empty() {
        address_ranges.insert("public".to_string(), public);
    }
    let cluster = split_nets(&spec.network.cluster_net);
    if !cluster.is_empty() {
        address_ranges.insert("cluster".to_string(), cluster);
    }

    CephClusterSpec {
        ceph_version: CephVersionSpec {
            image: image.to_string(),
        },
        data_dir_host_path,
        network: (!address_ranges.is_empty()).then_some(ClusterNetworkSpec { address_ranges }),
        mon: Some(MonSpec {
            count: mon_count,
            allow_multiple_per_node: false,
        }),
        mgr: Some(ClusterMgrSpec {
            count: mgr_count,
            modules: mgr_modules(spec),
        }),
        dashboard: Some(DashboardSpec {
            enabled: spec.dashboard,
        }),
        storage: Some(StorageScopeSpec {
            use_all_nodes: false,
            use_all_devices: false,
            nodes: storage_nodes(nodes),
        }),
        annotations: daemon_annotations(timestamps),
        cleanup_policy: None,
        external: None,
    }
}

/// The CephCluster object, named after the deployment.
pub fn generate_ceph_cluster(name: &str, rook_namespace: &str, spec: CephClusterSpec) -> CephCluster {
    CephCluster {
        metadata: child_meta(name, rook_namespace),
        spec,
        status: None,
    }
}
