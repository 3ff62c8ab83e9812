//! Phase decisions across consecutive passes.

use std::time::Duration;

use ceph_deployment_operator::controller::apply::{ApplyOutcome, ApplyStep};
use ceph_deployment_operator::controller::phase::{
    FAILURE_THRESHOLD, FailureTracker, LifecycleHold, MAINTENANCE_MESSAGE, PassOutcome, PhaseInput,
    READY_MESSAGE, Requeue, decide,
};
use ceph_deployment_operator::crd::{CephDeploymentStatus, DeploymentPhase};

const KEY: &str = "ceph-lcm-mirantis/cephcluster";

fn input(outcome: PassOutcome) -> PhaseInput {
    PhaseInput {
        key: KEY.to_string(),
        outcome,
        validation: None,
        cluster_version: None,
        obj_refs: None,
        subobject_issues: None,
        now: "2026-10-17T10:00:00Z".to_string(),
        interval: Duration::from_secs(60),
    }
}

fn applied(steps: &[(&'static str, bool, Option<&str>)]) -> PassOutcome {
    PassOutcome::Applied(ApplyOutcome {
        steps: steps
            .iter()
            .map(|(name, changed, error)| ApplyStep {
                name,
                changed: *changed,
                error: error.map(str::to_string),
            })
            .collect(),
    })
}

fn status(phase: DeploymentPhase, message: &str) -> CephDeploymentStatus {
    CephDeploymentStatus {
        phase,
        message: message.to_string(),
        ..Default::default()
    }
}

#[test]
fn test_three_failures_flip_to_failed() {
    let failures = FailureTracker::default();
    let mut current = status(DeploymentPhase::Ready, READY_MESSAGE);
    let mut phases = Vec::new();

    for _ in 0..FAILURE_THRESHOLD {
        let outcome = applied(&[("cephclients", false, Some("boom"))]);
        current = decide(input(outcome), &current, &failures).status;
        phases.push(current.phase);
    }

    assert_eq!(
        phases,
        vec![DeploymentPhase::Ready, DeploymentPhase::Ready, DeploymentPhase::Failed]
    );
    assert_eq!(current.message, "Ceph cluster configuration apply is failed: cephclients");

    // One clean pass recovers and resets the streak.
    current = decide(input(applied(&[])), &current, &failures).status;
    assert_eq!(current.phase, DeploymentPhase::Ready);
    assert_eq!(failures.count(KEY), 0);
}

#[test]
fn test_failed_does_not_override_maintenance() {
    let failures = FailureTracker::default();
    let previous = status(DeploymentPhase::Maintenance, MAINTENANCE_MESSAGE);

    let decision = decide(
        input(PassOutcome::VersionCheckFailed(
            "detected Ceph version downgrade from '19.2.3' to '18.2.4': downgrade is not possible".to_string(),
        )),
        &previous,
        &failures,
    );
    assert_eq!(decision.status.phase, DeploymentPhase::Maintenance);
    assert_eq!(decision.status.message, MAINTENANCE_MESSAGE);

    let decision = decide(input(PassOutcome::ValidationFailed), &previous, &failures);
    assert_eq!(decision.status.phase, DeploymentPhase::Maintenance);
    assert_eq!(decision.status.message, MAINTENANCE_MESSAGE);
}

#[test]
fn test_message_mixes_changed_and_failed_steps() {
    let failures = FailureTracker::default();
    let decision = decide(
        input(applied(&[
            ("cephcluster", true, None),
            ("cephblockpools", false, Some("boom")),
            ("cephclients", false, None),
        ])),
        &status(DeploymentPhase::Deploying, ""),
        &failures,
    );
    // Below the threshold the reported phase and message stay.
    assert_eq!(decision.status.phase, DeploymentPhase::Deploying);
    assert!(decision.status.message.is_empty());
    assert_eq!(failures.count(KEY), 1);
    assert_eq!(decision.requeue, Requeue::After(Duration::from_secs(60)));
}

#[test]
fn test_hold_with_subobject_issue_counts_as_failure() {
    let failures = FailureTracker::default();
    let mut pass = input(PassOutcome::Held(LifecycleHold::OnHold));
    pass.subobject_issues = Some("failed to create CephDeploymentHealth".to_string());

    let decision = decide(pass, &status(DeploymentPhase::Ready, READY_MESSAGE), &failures);
    assert_eq!(decision.status.phase, DeploymentPhase::OnHold);
    assert_eq!(failures.count(KEY), 1);
}

#[test]
fn test_subobject_issue_is_reported_before_steps() {
    let failures = FailureTracker::default();
    let mut pass = input(applied(&[("cephcluster", true, None)]));
    pass.subobject_issues = Some("failed to create CephDeploymentSecret".to_string());

    let mut current = status(DeploymentPhase::Deploying, "");
    for _ in 0..FAILURE_THRESHOLD {
        current = decide(pass.clone(), &current, &failures).status;
    }
    assert_eq!(current.phase, DeploymentPhase::Failed);
    assert_eq!(
        current.message,
        "Ceph cluster failed to create CephDeploymentSecret; configuration apply is in progress: cephcluster"
    );
}
