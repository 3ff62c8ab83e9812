//! NetworkPolicy generation for the Ceph daemons.

use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::CephDeploymentSpec;
use crate::resources::common::{NETWORK_POLICY_LABEL, child_meta, single};

/// Label value marking a policy as managed.
pub const MANAGED: &str = "managed";

/// Selector matching every managed policy.
pub fn managed_selector() -> String {
    format!("{NETWORK_POLICY_LABEL}={MANAGED}")
}

fn tcp(port: i32, end_port: Option<i32>) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(port)),
        end_port,
        protocol: Some("TCP".to_string()),
    }
}

/// Ingress ports per daemon app label.
///
/// rgw and mds are only listed when the deployment runs them.
pub fn daemon_ports(spec: &CephDeploymentSpec) -> Vec<(&'static str, Vec<NetworkPolicyPort>)> {
    let mut ports = vec![
        ("rook-ceph-mgr", vec![tcp(9283, None), tcp(6800, Some(7300))]),
        ("rook-ceph-mon", vec![tcp(3300, None), tcp(6789, None)]),
        ("rook-ceph-osd", vec![tcp(6800, Some(7300))]),
    ];
    if let Some(object_storage) = spec.object_storage.as_ref() {
        let gateway = &object_storage.rgw.gateway;
        ports.push((
            "rook-ceph-rgw",
            vec![tcp(gateway.port, None), tcp(gateway.secure_port, None)],
        ));
    }
    if spec
        .shared_filesystem
        .as_ref()
        .is_some_and(|fs| !fs.ceph_fs.is_empty())
    {
        ports.push(("rook-ceph-mds", vec![tcp(6800, Some(7300))]));
    }
    ports
}

/// `<app>-policy` admitting ingress on the daemon ports.
pub fn generate_network_policy(app: &str, ports: Vec<NetworkPolicyPort>, rook_namespace: &str) -> NetworkPolicy {
    let mut meta = child_meta(&format!("{app}-policy"), rook_namespace);
    meta.labels = Some(single(NETWORK_POLICY_LABEL, MANAGED));
    NetworkPolicy {
        metadata: meta,
        spec: Some(NetworkPolicySpec {
            ingress: Some(vec![NetworkPolicyIngressRule {
                ports: Some(ports),
                ..Default::default()
            }]),
            pod_selector: Some(LabelSelector {
                match_labels: Some(single("app", app)),
                ..Default::default()
            }),
            policy_types: Some(vec!["Ingress".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn desired_network_policies(spec: &CephDeploymentSpec, rook_namespace: &str) -> Vec<NetworkPolicy> {
    daemon_ports(spec)
        .into_iter()
        .map(|(app, ports)| generate_network_policy(app, ports, rook_namespace))
        .collect()
}
