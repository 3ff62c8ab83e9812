//! Test fixtures and builder patterns for CephDeployment.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ceph_deployment_operator::controller::config::OperatorConfig;
use ceph_deployment_operator::crd::{
    CephDeployment, CephDeploymentNode, CephDeploymentSpec, CephPool, ExtraOpts, NetworkSpec,
    NodeDevice, ObjectStorageSpec, ReplicatedSpec,
};

pub const NAMESPACE: &str = "ceph-lcm-mirantis";
pub const ROOK_NAMESPACE: &str = "rook-ceph";

/// Builder for creating CephDeployment test fixtures.
///
/// # Example
/// ```
/// let dpl = CephDeploymentBuilder::new("cephcluster")
///     .node(mon_node("node-a"))
///     .pool(replicated_pool("kubernetes", true))
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct CephDeploymentBuilder {
    name: String,
    namespace: String,
    spec: CephDeploymentSpec,
    finalizers: Vec<String>,
    generation: i64,
    uid: String,
}

impl CephDeploymentBuilder {
    /// Create a new builder with the given name and a routable network.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: format!("test-uid-{name}"),
            name,
            namespace: NAMESPACE.to_string(),
            spec: CephDeploymentSpec {
                network: NetworkSpec {
                    cluster_net: "10.10.0.0/24".to_string(),
                    public_net: "10.20.0.0/24".to_string(),
                },
                ..Default::default()
            },
            finalizers: Vec::new(),
            generation: 1,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn node(mut self, node: CephDeploymentNode) -> Self {
        self.spec.nodes.push(node);
        self
    }

    pub fn pool(mut self, pool: CephPool) -> Self {
        self.spec.pools.push(pool);
        self
    }

    pub fn network(mut self, cluster_net: &str, public_net: &str) -> Self {
        self.spec.network = NetworkSpec {
            cluster_net: cluster_net.to_string(),
            public_net: public_net.to_string(),
        };
        self
    }

    pub fn external(mut self) -> Self {
        self.spec.external = true;
        self
    }

    pub fn object_storage(mut self, object_storage: ObjectStorageSpec) -> Self {
        self.spec.object_storage = Some(object_storage);
        self
    }

    pub fn prevent_destroy(mut self) -> Self {
        self.spec.extra_opts = Some(ExtraOpts {
            prevent_cluster_destroy: true,
            ..self.spec.extra_opts.unwrap_or_default()
        });
        self
    }

    pub fn finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizers.push(finalizer.into());
        self
    }

    /// Set the generation (for testing validation bookkeeping).
    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn build(self) -> CephDeployment {
        CephDeployment {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                finalizers: (!self.finalizers.is_empty()).then_some(self.finalizers),
                generation: Some(self.generation),
                uid: Some(self.uid),
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}

/// A node running one monitor and one manager.
pub fn mon_node(name: &str) -> CephDeploymentNode {
    CephDeploymentNode {
        name: name.to_string(),
        roles: vec!["mon".to_string(), "mgr".to_string()],
        ..Default::default()
    }
}

/// A node running OSDs on one disk.
pub fn osd_node(name: &str, device: &str, device_class: &str) -> CephDeploymentNode {
    CephDeploymentNode {
        name: name.to_string(),
        devices: vec![NodeDevice {
            name: device.to_string(),
            full_path: None,
            config: BTreeMap::from([("deviceClass".to_string(), device_class.to_string())]),
        }],
        ..Default::default()
    }
}

pub fn replicated_pool(name: &str, default: bool) -> CephPool {
    let mut pool = CephPool {
        name: name.to_string(),
        role: name.to_string(),
        device_class: "hdd".to_string(),
        replicated: Some(ReplicatedSpec {
            size: 3,
            target_size_ratio: None,
        }),
        ..Default::default()
    };
    if default {
        pool.storage_class_opts = Some(ceph_deployment_operator::crd::StorageClassOpts {
            default: true,
            ..Default::default()
        });
    }
    pool
}

/// A Kubernetes node object with the given name.
pub fn k8s_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Operator settings used across the suites.
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        rook_namespace: ROOK_NAMESPACE.to_string(),
        ..Default::default()
    }
}

/// A valid single-node deployment.
pub fn minimal_deployment(name: &str) -> CephDeployment {
    CephDeploymentBuilder::new(name).node(mon_node("node-a")).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let dpl = CephDeploymentBuilder::new("test").build();
        assert_eq!(dpl.metadata.name.as_deref(), Some("test"));
        assert_eq!(dpl.metadata.namespace.as_deref(), Some(NAMESPACE));
        assert!(dpl.metadata.finalizers.is_none());
        assert!(!dpl.spec.external);
    }

    #[test]
    fn test_builder_with_options() {
        let dpl = CephDeploymentBuilder::new("test")
            .node(mon_node("node-a"))
            .pool(replicated_pool("kubernetes", true))
            .prevent_destroy()
            .build();
        assert_eq!(dpl.spec.nodes.len(), 1);
        assert!(dpl.spec.default_pool().is_some());
        assert!(dpl.spec.prevent_cluster_destroy());
    }
}
