//! In-memory harness driving reconcile passes.
//!
//! Every pass reads the deployment fresh from the memory stores, exactly as the
//! controller would after a watch event, and runs one full [`run_pass`].

use ceph_deployment_operator::controller::config::OperatorConfig;
use ceph_deployment_operator::controller::context::UpdateTimestamps;
use ceph_deployment_operator::controller::phase::FailureTracker;
use ceph_deployment_operator::controller::reconciler::{PassEnv, PassReport, run_pass};
use ceph_deployment_operator::crd::{CephDeployment, DeploymentPhase};
use ceph_deployment_operator::resources::common::MON_ENDPOINTS_NAME;
use ceph_deployment_operator::store::ObjectStore;
use ceph_deployment_operator::store::memory::MemoryStores;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::common::fixtures::{NAMESPACE, ROOK_NAMESPACE, k8s_node, test_config};

pub const VERSIONS_OUTPUT: &str =
    r#"{"overall": {"ceph version 19.2.3 (c92aebb2) squid (stable)": 5}}"#;

/// A deployment plus the cluster state it is reconciled against.
pub struct Harness {
    pub memory: MemoryStores,
    pub config: OperatorConfig,
    pub timestamps: UpdateTimestamps,
    pub failures: FailureTracker,
    name: String,
}

impl Harness {
    /// Seed `dpl` and a Kubernetes node for every named spec node.
    pub fn new(dpl: CephDeployment) -> Self {
        let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
        for node in &dpl.spec.nodes {
            memory.nodes.seed(k8s_node(&node.name));
        }
        let name = dpl.name_any();
        memory.deployments.seed(dpl);
        Self {
            memory,
            config: test_config(),
            timestamps: UpdateTimestamps::default(),
            failures: FailureTracker::default(),
            name,
        }
    }

    /// Pretend Rook brought the monitors up and script a healthy toolbox.
    pub fn with_running_ceph(self) -> Self {
        self.memory.config_maps.seed(ConfigMap {
            metadata: ObjectMeta {
                name: Some(MON_ENDPOINTS_NAME.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let cli = &self.memory.cli;
        cli.respond("ceph versions", VERSIONS_OUTPUT);
        cli.respond(
            "ceph mgr module ls -f json",
            r#"{"always_on_modules": ["balancer"], "enabled_modules": ["prometheus"]}"#,
        );
        cli.respond("ceph config get mgr mgr/progress/allow_pg_recovery_event", "false\n");
        cli.respond("ceph osd pool ls -f json", "[]");
        self
    }

    pub fn deployment(&self) -> Option<CephDeployment> {
        self.memory.deployments.snapshot(&self.name)
    }

    pub fn phase(&self) -> Option<DeploymentPhase> {
        self.deployment()
            .and_then(|d| d.status)
            .map(|status| status.phase)
    }

    pub fn message(&self) -> String {
        self.deployment()
            .and_then(|d| d.status)
            .map(|status| status.message)
            .unwrap_or_default()
    }

    /// Run one pass over the stored deployment.
    pub async fn pass(&self) -> PassReport {
        let dpl = self.deployment().expect("deployment is gone");
        let stores = self.memory.stores();
        let env = PassEnv {
            stores: &stores,
            config: &self.config,
            timestamps: &self.timestamps,
            failures: &self.failures,
        };
        run_pass(&dpl, &env).await.expect("pass failed")
    }

    /// Run passes until `phase` is reported, returning every phase seen.
    pub async fn run_until(&self, phase: DeploymentPhase, max_passes: usize) -> Vec<DeploymentPhase> {
        let mut seen = Vec::new();
        for _ in 0..max_passes {
            self.pass().await;
            let current = self.phase().unwrap_or_default();
            seen.push(current);
            if current == phase {
                return seen;
            }
        }
        panic!("phase {phase} not reached after {max_passes} passes, saw {seen:?}");
    }

    /// Request deletion the way the API server does.
    pub async fn delete(&self) {
        self.memory
            .deployments
            .delete(&self.name)
            .await
            .expect("delete failed");
    }

    /// Run passes until the deployment disappears; returns the pass count.
    pub async fn run_until_removed(&self, max_passes: usize) -> usize {
        for count in 1..=max_passes {
            let report = self.pass().await;
            if report.is_removed() {
                assert!(self.deployment().is_none(), "removed report but object still stored");
                return count;
            }
        }
        panic!("deployment still present after {max_passes} passes: {}", self.message());
    }
}
