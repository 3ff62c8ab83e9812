// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]

//! Unit tests for ceph-deployment-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod crd_tests {
    use ceph_deployment_operator::crd::{CephDeployment, DeploymentPhase};
    use kube::CustomResourceExt;

    use crate::common::fixtures::{CephDeploymentBuilder, replicated_pool};

    #[test]
    fn test_phase_display() {
        assert_eq!(DeploymentPhase::Creating.to_string(), "Creating");
        assert_eq!(DeploymentPhase::Deploying.to_string(), "Deploying");
        assert_eq!(DeploymentPhase::Ready.to_string(), "Ready");
        assert_eq!(DeploymentPhase::OnHold.to_string(), "OnHold");
        assert_eq!(DeploymentPhase::Maintenance.to_string(), "Maintenance");
        assert_eq!(DeploymentPhase::Deleting.to_string(), "Deleting");
        assert_eq!(DeploymentPhase::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(DeploymentPhase::default(), DeploymentPhase::Creating);
    }

    #[test]
    fn test_crd_identity() {
        let crd = CephDeployment::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("cephdeployments.lcm.mirantis.com"));
        assert_eq!(crd.spec.group, "lcm.mirantis.com");
        assert_eq!(crd.spec.names.kind, "CephDeployment");
        assert_eq!(crd.spec.versions[0].name, "v1alpha1");
    }

    #[test]
    fn test_status_round_trips_as_camel_case() {
        let json = serde_json::json!({
            "phase": "OnHold",
            "message": "Ceph cluster is under request processing",
            "clusterVersion": "v19.2.3",
            "lastRun": "2026-10-17T10:00:00Z",
        });
        let status: ceph_deployment_operator::crd::CephDeploymentStatus =
            serde_json::from_value(json).unwrap();
        assert_eq!(status.phase, DeploymentPhase::OnHold);
        assert_eq!(status.cluster_version, "v19.2.3");
        assert!(status.obj_refs.is_empty());
    }

    #[test]
    fn test_default_pool_and_prevent_destroy() {
        let dpl = CephDeploymentBuilder::new("cephcluster")
            .pool(replicated_pool("images", false))
            .pool(replicated_pool("volumes", true))
            .prevent_destroy()
            .build();
        assert_eq!(dpl.spec.default_pool().map(|p| p.name.as_str()), Some("volumes"));
        assert!(dpl.spec.prevent_cluster_destroy());
    }
}

mod state_machine_tests {
    use ceph_deployment_operator::controller::phase::{PhaseEvent, PhaseStateMachine, TransitionResult};
    use ceph_deployment_operator::crd::DeploymentPhase;

    const ALL: [DeploymentPhase; 7] = [
        DeploymentPhase::Creating,
        DeploymentPhase::Deploying,
        DeploymentPhase::Ready,
        DeploymentPhase::OnHold,
        DeploymentPhase::Maintenance,
        DeploymentPhase::Deleting,
        DeploymentPhase::Failed,
    ];

    #[test]
    fn test_deletion_from_all_states() {
        let machine = PhaseStateMachine::new();
        for phase in ALL {
            assert!(
                machine.can_transition(phase, PhaseEvent::DeletionRequested),
                "{phase} should accept deletion"
            );
        }
    }

    #[test]
    fn test_deleting_only_accepts_deletion() {
        let machine = PhaseStateMachine::new();
        for event in [
            PhaseEvent::ApplySucceeded,
            PhaseEvent::ApplyInProgress,
            PhaseEvent::ValidationFailed,
            PhaseEvent::RemovalTaskActive,
            PhaseEvent::MaintenanceActing,
        ] {
            assert!(!machine.can_transition(DeploymentPhase::Deleting, event), "{event}");
        }
    }

    #[test]
    fn test_failures_skip_holds() {
        let machine = PhaseStateMachine::new();
        for phase in [DeploymentPhase::OnHold, DeploymentPhase::Maintenance] {
            for event in [
                PhaseEvent::ValidationFailed,
                PhaseEvent::NodeExpansionFailed,
                PhaseEvent::VersionCheckFailed,
                PhaseEvent::MultipleDeployments,
                PhaseEvent::SetupVerificationFailed,
                PhaseEvent::FailureThresholdReached,
            ] {
                assert!(!machine.can_transition(phase, event), "{phase} on {event}");
            }
        }
    }

    #[test]
    fn test_holds_release_on_apply() {
        let machine = PhaseStateMachine::new();
        match machine.transition(DeploymentPhase::Maintenance, PhaseEvent::ApplySucceeded) {
            TransitionResult::Success { to, .. } => assert_eq!(to, DeploymentPhase::Ready),
            other => panic!("unexpected {other:?}"),
        }
        assert!(machine.can_transition(DeploymentPhase::OnHold, PhaseEvent::ApplyInProgress));
        assert!(machine.can_transition(DeploymentPhase::Failed, PhaseEvent::ApplySucceeded));
    }
}

mod apply_tests {
    use ceph_deployment_operator::controller::apply::{ApplyStep, compose_message};

    fn step(name: &'static str, changed: bool, error: Option<&str>) -> ApplyStep {
        ApplyStep {
            name,
            changed,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_message_composition_example() {
        let steps = [step("A", true, None), step("B", false, Some("boom")), step("C", false, None)];
        assert_eq!(
            compose_message(&steps),
            "configuration apply is in progress: A; configuration apply is failed: B"
        );
    }

    #[test]
    fn test_changed_and_failed_step_counts_as_failed() {
        let steps = [step("cephcluster", true, Some("boom")), step("cephclients", true, None)];
        assert_eq!(
            compose_message(&steps),
            "configuration apply is in progress: cephclients; configuration apply is failed: cephcluster"
        );
    }
}

mod error_tests {
    use ceph_deployment_operator::controller::error::Error;
    use std::time::Duration;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Boom".to_string(),
            code,
        }))
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(api_error(504).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(!api_error(403).is_retryable());

        assert!(!Error::Validation("invalid spec".to_string()).is_retryable());
        assert!(Error::Transient("temporary failure".to_string()).is_retryable());
        assert!(
            Error::Exec {
                command: "ceph versions".to_string(),
                reason: "toolbox not ready".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_classification() {
        assert!(api_error(404).is_not_found());
        assert!(Error::not_found("CephCluster", "cephcluster").is_not_found());
        assert!(api_error(409).is_conflict());
        assert_eq!(
            Error::Permanent("bad".to_string()).requeue_after(),
            Duration::from_secs(300)
        );
    }
}

mod config_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use ceph_deployment_operator::controller::config::{DEFAULT_CEPH_IMAGE, OperatorConfig};

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("ROOK_NAMESPACE", "storage"),
            ("REQUEUE_INTERVAL_SECS", "15"),
            ("RGW_PUBLIC_ACCESS_LABEL", "public=yes"),
        ]
        .into();
        let config = OperatorConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.rook_namespace, "storage");
        assert_eq!(config.ceph_image, DEFAULT_CEPH_IMAGE);
        assert_eq!(config.requeue_interval, Duration::from_secs(15));
        assert_eq!(config.rgw_public_access_label(), Some(("public", "yes")));
    }

    #[test]
    fn test_broken_label_is_ignored() {
        let config = OperatorConfig {
            rgw_public_access_label: "=yes".to_string(),
            ..Default::default()
        };
        assert_eq!(config.rgw_public_access_label(), None);
    }
}

mod version_tests {
    use ceph_deployment_operator::controller::version::{check_transition, image_version, parse_version};
    use semver::Version;

    #[test]
    fn test_image_tags() {
        assert_eq!(image_version("quay.io/ceph/ceph:v19.2.3"), Some(Version::new(19, 2, 3)));
        assert_eq!(
            image_version("registry.local:5000/ceph:v18.2.4-cve"),
            Some(Version::new(18, 2, 4))
        );
        assert_eq!(image_version("quay.io/ceph/ceph"), None);
        assert_eq!(parse_version("ceph version 19.2.3 (abc) squid (stable)"), Some(Version::new(19, 2, 3)));
    }

    #[test]
    fn test_transition_rules() {
        let reef = Version::new(18, 2, 4);
        let squid = Version::new(19, 2, 3);
        let tentacle = Version::new(20, 1, 0);

        assert!(check_transition(&reef, &squid).is_ok());
        assert!(check_transition(&squid, &squid).is_ok());
        assert!(check_transition(&squid, &reef).unwrap_err().contains("downgrade is not possible"));
        assert!(
            check_transition(&reef, &tentacle)
                .unwrap_err()
                .contains("step over one major version")
        );
    }
}
