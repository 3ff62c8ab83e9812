// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for ceph-deployment-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;

use ceph_deployment_operator::controller::apply::{ApplyOutcome, ApplyStep};
use ceph_deployment_operator::controller::differ::{DiffScope, converge};
use ceph_deployment_operator::controller::phase::{
    FAILURE_THRESHOLD, FailureTracker, PassOutcome, PhaseInput, decide,
};
use ceph_deployment_operator::crd::{
    CephClient, CephClientResourceSpec, CephDeploymentStatus, DeploymentPhase,
};
use ceph_deployment_operator::store::memory::MemoryStore;

const NAMESPACE: &str = "rook-ceph";

const SCOPE: DiffScope<'static> = DiffScope {
    kinds: "CephClients",
    namespace: NAMESPACE,
    selector: None,
};

/// Strategy for a set of client names mapped to their caps.
fn client_set() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-e]", "profile rbd( pool=[a-c])?", 0..5)
}

fn client(name: &str, caps: &str) -> CephClient {
    let mut obj = CephClient::new(
        name,
        CephClientResourceSpec {
            caps: [("osd".to_string(), caps.to_string())].into(),
        },
    );
    obj.metadata.namespace = Some(NAMESPACE.to_string());
    obj
}

fn any_phase() -> impl Strategy<Value = DeploymentPhase> {
    prop_oneof![
        Just(DeploymentPhase::Creating),
        Just(DeploymentPhase::Deploying),
        Just(DeploymentPhase::Ready),
        Just(DeploymentPhase::OnHold),
        Just(DeploymentPhase::Maintenance),
        Just(DeploymentPhase::Failed),
    ]
}

fn failing_pass() -> PhaseInput {
    PhaseInput {
        key: "ceph-lcm-mirantis/cephcluster".to_string(),
        outcome: PassOutcome::Applied(ApplyOutcome {
            steps: vec![ApplyStep {
                name: "cephblockpools",
                changed: false,
                error: Some("boom".to_string()),
            }],
        }),
        validation: None,
        cluster_version: None,
        obj_refs: None,
        subobject_issues: None,
        now: "2026-10-17T10:00:00Z".to_string(),
        interval: Duration::from_secs(60),
    }
}

proptest! {
    /// After one converge the live set equals the desired set, and a
    /// second converge writes nothing.
    #[test]
    fn test_converge_makes_live_match_desired(live in client_set(), desired in client_set()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let store = MemoryStore::new(Some(NAMESPACE));
        for (name, caps) in &live {
            store.seed(client(name, caps));
        }

        let want: Vec<CephClient> = desired.iter().map(|(n, c)| client(n, c)).collect();
        let changed = runtime.block_on(converge(&store, &SCOPE, want.clone())).unwrap();
        prop_assert_eq!(changed, live != desired);

        let names: Vec<String> = desired.keys().cloned().collect();
        prop_assert_eq!(store.names(), names);
        for (name, caps) in &desired {
            prop_assert_eq!(&store.snapshot(name).unwrap().spec.caps["osd"], caps);
        }

        store.clear_calls();
        prop_assert!(!runtime.block_on(converge(&store, &SCOPE, want)).unwrap());
        prop_assert!(store.writes().is_empty());
    }

    /// A failing streak reports Failed exactly at the threshold, and never
    /// over a lifecycle hold.
    #[test]
    fn test_failure_threshold(start in any_phase(), passes in 1u32..8) {
        let failures = FailureTracker::default();
        let mut status = CephDeploymentStatus {
            phase: start,
            ..Default::default()
        };
        for pass in 1..=passes {
            status = decide(failing_pass(), &status, &failures).status;
            let held = matches!(start, DeploymentPhase::OnHold | DeploymentPhase::Maintenance);
            let expected = if pass >= FAILURE_THRESHOLD && !held {
                DeploymentPhase::Failed
            } else {
                start
            };
            prop_assert_eq!(status.phase, expected);
        }
    }
}
