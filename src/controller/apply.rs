//! Apply sequencer: runs the ensure steps of one pass in a fixed order and
//! folds their outcomes into the status message.
//!
//! Steps never short-circuit each other: the pre-steps (node labels, node
//! annotations, network policies) run first, then every main step runs
//! whatever the pre-steps reported.

use std::fmt;

use tracing::{debug, error, info};

use crate::controller::children::{
    ensure_block_pools, ensure_clients, ensure_network_policies, ensure_rbd_mirror,
};
use crate::controller::cluster::{ensure_cluster, ensure_cluster_state};
use crate::controller::differ::StepOutcome;
use crate::controller::filesystems::ensure_shared_filesystems;
use crate::controller::ingress::ensure_ingress;
use crate::controller::nodes::{ensure_annotate_nodes, ensure_label_nodes};
use crate::controller::object_storage::ensure_object_storage;
use crate::controller::openstack::ensure_openstack_secret;
use crate::controller::pass::PassContext;
use crate::controller::storage_classes::ensure_storage_classes;

const IN_PROGRESS_PREFIX: &str = "configuration apply is in progress";
const FAILED_PREFIX: &str = "configuration apply is failed";

/// Outcome of one named step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyStep {
    pub name: &'static str,
    pub changed: bool,
    pub error: Option<String>,
}

impl ApplyStep {
    pub fn from_outcome(name: &'static str, outcome: StepOutcome) -> Self {
        match outcome {
            Ok(changed) => Self {
                name,
                changed,
                error: None,
            },
            Err(e) => Self {
                name,
                changed: false,
                error: Some(e),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The ensure steps, in apply order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    LabelNodes,
    AnnotateNodes,
    NetworkPolicies,
    CephCluster,
    BlockPools,
    SharedFilesystems,
    StorageClasses,
    Clients,
    ObjectStorage,
    RbdMirroring,
    OpenstackSecret,
    IngressProxy,
    ClusterState,
}

impl StepKind {
    /// Token used for this step in status messages and metrics.
    pub const fn name(self) -> &'static str {
        match self {
            StepKind::LabelNodes => "label nodes",
            StepKind::AnnotateNodes => "annotate nodes",
            StepKind::NetworkPolicies => "network policies",
            StepKind::CephCluster => "cephcluster",
            StepKind::BlockPools => "cephblockpools",
            StepKind::SharedFilesystems => "shared filesystems",
            StepKind::StorageClasses => "storageclasses",
            StepKind::Clients => "cephclients",
            StepKind::ObjectStorage => "ceph object storage",
            StepKind::RbdMirroring => "RBD Mirroring",
            StepKind::OpenstackSecret => "Openstack secret",
            StepKind::IngressProxy => "ingress proxy",
            StepKind::ClusterState => "cluster state",
        }
    }

    /// Steps that only apply to a cluster this operator deploys.
    const fn local_only(self) -> bool {
        matches!(
            self,
            StepKind::LabelNodes
                | StepKind::AnnotateNodes
                | StepKind::NetworkPolicies
                | StepKind::BlockPools
                | StepKind::SharedFilesystems
                | StepKind::OpenstackSecret
                | StepKind::IngressProxy
                | StepKind::ClusterState
        )
    }

    async fn run(self, pass: &PassContext<'_>) -> StepOutcome {
        match self {
            StepKind::LabelNodes => ensure_label_nodes(pass).await,
            StepKind::AnnotateNodes => ensure_annotate_nodes(pass).await,
            StepKind::NetworkPolicies => ensure_network_policies(pass).await,
            StepKind::CephCluster => ensure_cluster(pass).await,
            StepKind::BlockPools => ensure_block_pools(pass).await,
            StepKind::SharedFilesystems => ensure_shared_filesystems(pass).await,
            StepKind::StorageClasses => ensure_storage_classes(pass).await,
            StepKind::Clients => ensure_clients(pass).await,
            StepKind::ObjectStorage => ensure_object_storage(pass).await,
            StepKind::RbdMirroring => ensure_rbd_mirror(pass).await,
            StepKind::OpenstackSecret => ensure_openstack_secret(pass).await,
            StepKind::IngressProxy => ensure_ingress(pass).await,
            StepKind::ClusterState => ensure_cluster_state(pass).await,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PRE_STEPS: [StepKind; 3] = [
    StepKind::LabelNodes,
    StepKind::AnnotateNodes,
    StepKind::NetworkPolicies,
];

const MAIN_STEPS: [StepKind; 10] = [
    StepKind::CephCluster,
    StepKind::BlockPools,
    StepKind::SharedFilesystems,
    StepKind::StorageClasses,
    StepKind::Clients,
    StepKind::ObjectStorage,
    StepKind::RbdMirroring,
    StepKind::OpenstackSecret,
    StepKind::IngressProxy,
    StepKind::ClusterState,
];

/// Pre-steps and main steps for the given deployment mode.
pub fn step_plan(external: bool) -> (Vec<StepKind>, Vec<StepKind>) {
    let keep = |step: &StepKind| !external || !step.local_only();
    (
        PRE_STEPS.into_iter().filter(keep).collect(),
        MAIN_STEPS.into_iter().filter(keep).collect(),
    )
}

/// Everything the steps of one pass reported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub steps: Vec<ApplyStep>,
}

impl ApplyOutcome {
    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(ApplyStep::is_failed)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &ApplyStep> {
        self.steps.iter().filter(|s| s.is_failed())
    }

    pub fn message(&self) -> String {
        compose_message(&self.steps)
    }
}

/// `configuration apply is in progress: A, B; configuration apply is failed: C`
///
/// Either clause is omitted when empty; the result is empty when nothing
/// changed and nothing failed.
pub fn compose_message(steps: &[ApplyStep]) -> String {
    let changed: Vec<&str> = steps
        .iter()
        .filter(|s| s.changed && !s.is_failed())
        .map(|s| s.name)
        .collect();
    let failed: Vec<&str> = steps.iter().filter(|s| s.is_failed()).map(|s| s.name).collect();

    let mut parts = Vec::new();
    if !changed.is_empty() {
        parts.push(format!("{IN_PROGRESS_PREFIX}: {}", changed.join(", ")));
    }
    if !failed.is_empty() {
        parts.push(format!("{FAILED_PREFIX}: {}", failed.join(", ")));
    }
    parts.join("; ")
}

async fn run_one(step: StepKind, pass: &PassContext<'_>) -> ApplyStep {
    debug!(deployment = %pass.key(), step = %step, "Running apply step");
    let result = ApplyStep::from_outcome(step.name(), step.run(pass).await);
    if let Some(e) = result.error.as_deref() {
        error!(deployment = %pass.key(), step = %step, error = %e, "failed to ensure {step}");
    }
    result
}

/// Run every step of the pass in order.
pub async fn run_steps(pass: &PassContext<'_>) -> ApplyOutcome {
    let (pre_steps, main_steps) = step_plan(pass.spec().external);
    let mut outcome = ApplyOutcome::default();

    for step in pre_steps.into_iter().chain(main_steps) {
        outcome.steps.push(run_one(step, pass).await);
    }
    let message = outcome.message();
    if !message.is_empty() {
        info!(deployment = %pass.key(), "{message}");
    }
    outcome
}
