//! Full reconcile passes against in-memory cluster state.

use ceph_deployment_operator::controller::common::FINALIZER;
use ceph_deployment_operator::controller::phase::{ON_HOLD_MESSAGE, READY_MESSAGE, Requeue};
use ceph_deployment_operator::crd::{
    CephOsdRemoveTask, CephOsdRemoveTaskSpec, CephOsdRemoveTaskStatus, DeploymentPhase,
    TaskPhase, ValidationResult,
};
use ceph_deployment_operator::resources::common::{CONFIG_OVERRIDE_NAME, DAEMONSET_NODE_LABEL};
use ceph_deployment_operator::store::memory::{ANY_NAME, StoreOp};
use kube::ResourceExt;

use crate::common::fixtures::{
    CephDeploymentBuilder, NAMESPACE, ROOK_NAMESPACE, minimal_deployment, mon_node,
};
use crate::harness::Harness;

const NAME: &str = "cephcluster";

#[tokio::test]
async fn test_first_pass_adds_finalizer() {
    let harness = Harness::new(minimal_deployment(NAME));

    let report = harness.pass().await;
    assert_eq!(report.decision.requeue, Requeue::Immediate);

    let dpl = harness.deployment().unwrap();
    assert!(dpl.finalizers().iter().any(|f| f == FINALIZER));
    let status = dpl.status.unwrap();
    assert_eq!(status.phase, DeploymentPhase::Creating);
    assert_eq!(status.validation.result, Some(ValidationResult::Succeed));
    assert_eq!(status.validation.last_validated_generation, 1);
    assert!(harness.memory.clusters.is_empty());
}

#[tokio::test]
async fn test_fresh_deployment_is_deploying_until_monitors_exist() {
    let harness = Harness::new(minimal_deployment(NAME));

    let phases = harness.run_until(DeploymentPhase::Deploying, 3).await;
    assert_eq!(phases, vec![DeploymentPhase::Creating, DeploymentPhase::Deploying]);
    assert!(harness.message().starts_with("Ceph cluster configuration apply is in progress:"));
    assert!(harness.message().contains("cephcluster"));
    assert!(harness.message().contains("cluster state"));

    assert!(harness.memory.clusters.snapshot(NAME).is_some());
    assert!(harness.memory.config_maps.snapshot(CONFIG_OVERRIDE_NAME).is_some());
    assert!(harness.memory.healths.snapshot(NAME).is_some());
    assert!(harness.memory.lcm_secrets.snapshot(NAME).is_some());
    assert!(harness.memory.maintenances.snapshot(NAME).is_some());
    assert_eq!(harness.deployment().unwrap().status.unwrap().obj_refs.len(), 3);

    // No monitors yet: the cluster state step keeps the deployment busy.
    harness.pass().await;
    assert_eq!(harness.phase(), Some(DeploymentPhase::Deploying));
}

#[tokio::test]
async fn test_running_cluster_converges_to_ready() {
    let harness = Harness::new(minimal_deployment(NAME)).with_running_ceph();

    let phases = harness.run_until(DeploymentPhase::Ready, 5).await;
    assert_eq!(
        phases,
        vec![DeploymentPhase::Creating, DeploymentPhase::Deploying, DeploymentPhase::Ready]
    );
    let status = harness.deployment().unwrap().status.unwrap();
    assert_eq!(status.message, READY_MESSAGE);
    assert_eq!(status.cluster_version, "v19.2.3");

    // A settled deployment writes nothing to the children.
    harness.memory.clusters.clear_calls();
    harness.memory.config_maps.clear_calls();
    let report = harness.pass().await;
    assert!(report.failed_steps.is_empty());
    assert!(harness.memory.clusters.writes().is_empty());
    assert!(harness.memory.config_maps.writes().is_empty());
    assert_eq!(harness.phase(), Some(DeploymentPhase::Ready));
}

#[tokio::test]
async fn test_invalid_spec_fails_without_finalizer() {
    let dpl = CephDeploymentBuilder::new(NAME)
        .node(mon_node("node-a"))
        .network("10.10.0.0/24", "0.0.0.0/0")
        .build();
    let harness = Harness::new(dpl);

    harness.pass().await;
    let dpl = harness.deployment().unwrap();
    assert!(dpl.finalizers().is_empty());
    let status = dpl.status.unwrap();
    assert_eq!(status.phase, DeploymentPhase::Failed);
    assert_eq!(status.validation.result, Some(ValidationResult::Failed));
    assert_eq!(
        status.message,
        "validation of CephDeployment spec is failed: network publicNet parameter contains prohibited 0.0.0.0 range"
    );
    assert!(harness.memory.clusters.is_empty());
}

#[tokio::test]
async fn test_processing_remove_task_puts_on_hold() {
    let harness = Harness::new(minimal_deployment(NAME));
    let mut task = CephOsdRemoveTask::new("remove-node-a", CephOsdRemoveTaskSpec::default());
    task.status = Some(CephOsdRemoveTaskStatus {
        phase: TaskPhase::Processing,
        conditions: Vec::new(),
    });
    harness.memory.osd_remove_tasks.seed(task);

    harness.run_until(DeploymentPhase::OnHold, 3).await;
    assert_eq!(harness.message(), ON_HOLD_MESSAGE);
    assert!(harness.memory.clusters.is_empty());
    // Companions are still ensured while held.
    assert!(harness.memory.healths.snapshot(NAME).is_some());
}

#[tokio::test]
async fn test_deletion_removes_children_then_finalizer() {
    let harness = Harness::new(minimal_deployment(NAME)).with_running_ceph();
    harness.run_until(DeploymentPhase::Ready, 5).await;

    harness.delete().await;
    let report = harness.pass().await;
    assert_eq!(report.decision.requeue, Requeue::Immediate);
    assert_eq!(harness.phase(), Some(DeploymentPhase::Deleting));
    assert!(harness.memory.clusters.snapshot(NAME).is_some());

    let passes = harness.run_until_removed(8).await;
    assert!(passes >= 2, "teardown finished in {passes} pass(es)");
    assert!(harness.memory.clusters.is_empty());
    assert!(harness.memory.healths.is_empty());
    assert!(harness.memory.lcm_secrets.is_empty());
    assert!(harness.memory.maintenances.is_empty());
}

#[tokio::test]
async fn test_prevent_destroy_keeps_cluster() {
    let dpl = CephDeploymentBuilder::new(NAME)
        .node(mon_node("node-a"))
        .prevent_destroy()
        .build();
    let harness = Harness::new(dpl).with_running_ceph();
    harness.run_until(DeploymentPhase::Ready, 5).await;

    harness.delete().await;
    harness.pass().await;
    harness.pass().await;

    let dpl = harness.deployment().unwrap();
    assert!(dpl.metadata.deletion_timestamp.is_some());
    assert!(dpl.finalizers().iter().any(|f| f == FINALIZER));
    assert_eq!(harness.phase(), Some(DeploymentPhase::Ready));
    assert!(harness.memory.clusters.snapshot(NAME).is_some());
}

#[tokio::test]
async fn test_failed_node_labels_do_not_hold_back_cluster() {
    let harness = Harness::new(minimal_deployment(NAME));
    harness.pass().await;
    harness
        .memory
        .nodes
        .fail_on(StoreOp::Update, ANY_NAME, "node is being drained");

    let report = harness.pass().await;
    assert_eq!(report.failed_steps, vec!["label nodes"]);
    assert!(harness.memory.clusters.snapshot(NAME).is_some());
    assert!(harness.message().contains("configuration apply is failed: label nodes"));
    assert!(harness.message().contains("cephcluster"));
}

#[tokio::test]
async fn test_second_deployment_in_namespace_fails() {
    let harness = Harness::new(minimal_deployment(NAME));
    harness.memory.deployments.seed(minimal_deployment("cephcluster-2"));

    harness.pass().await;
    assert_eq!(harness.phase(), Some(DeploymentPhase::Failed));
    assert_eq!(
        harness.message(),
        format!("incorrect number of CephDeployments in {NAMESPACE} namespace")
    );
    assert!(!harness.deployment().unwrap().finalizers().iter().any(|f| f == FINALIZER));
}

#[tokio::test]
async fn test_rook_image_rollout_stops_pass() {
    let mut harness = Harness::new(minimal_deployment(NAME));
    harness.config.rook_image = Some("docker.io/rook/ceph:v1.17.4".to_string());
    harness.pass().await;

    harness.pass().await;
    assert_eq!(harness.phase(), Some(DeploymentPhase::Failed));
    assert_eq!(
        harness.message(),
        format!(
            "failed to ensure consistent Rook image version: failed to get {ROOK_NAMESPACE}/rook-ceph-operator deployment"
        )
    );
    assert!(harness.memory.clusters.is_empty());
}

#[tokio::test]
async fn test_nodes_get_daemonset_label() {
    let harness = Harness::new(minimal_deployment(NAME));
    harness.pass().await;
    harness.pass().await;

    let node = harness.memory.nodes.snapshot("node-a").unwrap();
    assert_eq!(
        node.labels().get(DAEMONSET_NODE_LABEL).map(String::as_str),
        Some("true")
    );
}
