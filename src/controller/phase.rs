//! Phase state machine for CephDeployment.
//!
//! The phase is decided once per pass by [`decide`], a pure function of the
//! pass outcome, the previously reported status and the failure counter.
//! Every phase change is checked against an explicit transition table.
//!
//! ## Phases
//!
//! Creating → Deploying ⇄ Ready
//!
//! Any phase except Deleting can move to:
//! - OnHold while a CephOsdRemoveTask is active
//! - Maintenance while a maintenance lock is acting
//! - Deleting once deletion is requested
//!
//! Failed is entered on validation, version or setup failures, when the
//! namespace holds more than one CephDeployment, or on the third
//! consecutive failing pass. It is never entered from OnHold or Maintenance;
//! those keep their reported phase and message instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::{debug, warn};

use crate::controller::apply::ApplyOutcome;
use crate::crd::{CephDeploymentStatus, DeploymentPhase, ObjectRef, ValidationStatus};

/// Consecutive failing passes that flip the phase to Failed.
pub const FAILURE_THRESHOLD: u32 = 3;

pub const DELETION_IN_PROGRESS: &str = "Ceph cluster deletion is in progress";
pub const DELETION_FAILING: &str = "Ceph cluster is failing to remove";
pub const FINALIZER_REMOVAL_FAILED: &str = "Ceph cluster is removed, failed to cleanup CephDeployment";
pub const MAINTENANCE_MESSAGE: &str = "Cluster maintenance (upgrade) detected, reconcile is paused";
pub const ON_HOLD_MESSAGE: &str = "Ceph cluster is under request processing";
pub const READY_MESSAGE: &str = "Ceph cluster configuration successfully applied";

/// Consecutive failing passes per deployment.
#[derive(Debug, Default)]
pub struct FailureTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl FailureTracker {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.counts.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Count one more failing pass and return the new streak length.
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut counts = self.lock();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn count(&self, key: &str) -> u32 {
        self.lock().get(key).copied().unwrap_or(0)
    }
}

/// When to run the next pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    Immediate,
    None,
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::After(interval) => Action::requeue(interval),
            Requeue::Immediate => Action::requeue(Duration::ZERO),
            Requeue::None => Action::await_change(),
        }
    }
}

/// A hold placed on the reconcile by another controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleHold {
    OnHold,
    Maintenance,
}

/// How far one teardown pass got.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// First pass after deletion was requested; nothing removed yet.
    Started,
    InProgress,
    /// Teardown reported an error.
    Failing(String),
    /// Everything is gone and the finalizer was dropped.
    Finished,
    /// Everything is gone but the finalizer could not be dropped.
    FinalizerRemovalFailed,
}

/// What happened during the pass, in reconcile order.
#[derive(Clone, Debug, PartialEq)]
pub enum PassOutcome {
    Deletion(DeletionOutcome),
    NodeExpansionFailed(String),
    ValidationFailed,
    FinalizerAdded,
    /// More than one CephDeployment shares the namespace.
    MultipleDeployments(String),
    /// The namespace could not be listed.
    NamespaceCheckFailed(String),
    VersionCheckFailed(String),
    SetupFailed(String),
    LifecycleCheckFailed(String),
    Held(LifecycleHold),
    Applied(ApplyOutcome),
}

/// Inputs of one phase decision.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseInput {
    /// Deployment identity, used for the failure counter.
    pub key: String,
    pub outcome: PassOutcome,
    /// Fresh validation result; `None` keeps the reported one.
    pub validation: Option<ValidationStatus>,
    /// Fresh cluster version; `None` keeps the reported one.
    pub cluster_version: Option<String>,
    /// Fresh companion references; `None` keeps the reported ones.
    pub obj_refs: Option<Vec<ObjectRef>>,
    /// Companion objects that could not be ensured.
    pub subobject_issues: Option<String>,
    pub now: String,
    pub interval: Duration,
}

/// Result of one phase decision.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseDecision {
    pub status: CephDeploymentStatus,
    /// Whether the status should be written back.
    pub persist: bool,
    pub requeue: Requeue,
}

/// Events that move the phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseEvent {
    DeletionRequested,
    ValidationFailed,
    NodeExpansionFailed,
    VersionCheckFailed,
    MultipleDeployments,
    SetupVerificationFailed,
    FailureThresholdReached,
    RemovalTaskActive,
    MaintenanceActing,
    ApplyInProgress,
    ApplySucceeded,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseEvent::DeletionRequested => write!(f, "DeletionRequested"),
            PhaseEvent::ValidationFailed => write!(f, "ValidationFailed"),
            PhaseEvent::NodeExpansionFailed => write!(f, "NodeExpansionFailed"),
            PhaseEvent::VersionCheckFailed => write!(f, "VersionCheckFailed"),
            PhaseEvent::MultipleDeployments => write!(f, "MultipleDeployments"),
            PhaseEvent::SetupVerificationFailed => write!(f, "SetupVerificationFailed"),
            PhaseEvent::FailureThresholdReached => write!(f, "FailureThresholdReached"),
            PhaseEvent::RemovalTaskActive => write!(f, "RemovalTaskActive"),
            PhaseEvent::MaintenanceActing => write!(f, "MaintenanceActing"),
            PhaseEvent::ApplyInProgress => write!(f, "ApplyInProgress"),
            PhaseEvent::ApplySucceeded => write!(f, "ApplySucceeded"),
        }
    }
}

/// One allowed phase change.
#[derive(Debug)]
pub struct Transition {
    pub from: DeploymentPhase,
    pub to: DeploymentPhase,
    pub event: PhaseEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: DeploymentPhase,
        to: DeploymentPhase,
        event: PhaseEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of looking an event up in the table.
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: DeploymentPhase,
        to: DeploymentPhase,
        event: PhaseEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: DeploymentPhase,
        event: PhaseEvent,
    },
}

/// Phases a failure may be reported from.
const FAILABLE: [DeploymentPhase; 4] = [
    DeploymentPhase::Creating,
    DeploymentPhase::Deploying,
    DeploymentPhase::Ready,
    DeploymentPhase::Failed,
];

/// Phases that are not Deleting.
const ACTIVE: [DeploymentPhase; 6] = [
    DeploymentPhase::Creating,
    DeploymentPhase::Deploying,
    DeploymentPhase::Ready,
    DeploymentPhase::OnHold,
    DeploymentPhase::Maintenance,
    DeploymentPhase::Failed,
];

/// Transition table of the CephDeployment phase.
pub struct PhaseStateMachine {
    transitions: Vec<Transition>,
}

impl Default for PhaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStateMachine {
    pub fn new() -> Self {
        let mut transitions = Vec::new();

        // ========================================
        // Deletion, from any phase
        // ========================================
        for from in ACTIVE {
            transitions.push(Transition::new(
                from,
                DeploymentPhase::Deleting,
                PhaseEvent::DeletionRequested,
                "Deletion requested, tearing down child resources",
            ));
        }
        transitions.push(Transition::new(
            DeploymentPhase::Deleting,
            DeploymentPhase::Deleting,
            PhaseEvent::DeletionRequested,
            "Teardown continues",
        ));

        // ========================================
        // Failures, never over OnHold or Maintenance
        // ========================================
        for from in FAILABLE {
            for (event, description) in [
                (PhaseEvent::ValidationFailed, "Spec validation failed"),
                (PhaseEvent::NodeExpansionFailed, "Node list could not be expanded"),
                (PhaseEvent::VersionCheckFailed, "Ceph version change is not allowed"),
                (PhaseEvent::MultipleDeployments, "Namespace holds more than one CephDeployment"),
                (PhaseEvent::SetupVerificationFailed, "Rook or Ceph images are not settled"),
                (PhaseEvent::FailureThresholdReached, "Apply kept failing"),
            ] {
                transitions.push(Transition::new(from, DeploymentPhase::Failed, event, description));
            }
        }

        // ========================================
        // Lifecycle holds
        // ========================================
        for from in ACTIVE {
            transitions.push(Transition::new(
                from,
                DeploymentPhase::OnHold,
                PhaseEvent::RemovalTaskActive,
                "OSD removal task holds the reconcile",
            ));
            transitions.push(Transition::new(
                from,
                DeploymentPhase::Maintenance,
                PhaseEvent::MaintenanceActing,
                "Maintenance holds the reconcile",
            ));
        }

        // ========================================
        // Apply results
        // ========================================
        for from in ACTIVE {
            transitions.push(Transition::new(
                from,
                DeploymentPhase::Deploying,
                PhaseEvent::ApplyInProgress,
                "Configuration apply in progress",
            ));
            transitions.push(Transition::new(
                from,
                DeploymentPhase::Ready,
                PhaseEvent::ApplySucceeded,
                "Configuration applied",
            ));
        }

        Self { transitions }
    }

    pub fn transition(&self, current: DeploymentPhase, event: PhaseEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: DeploymentPhase, event: PhaseEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }
}

/// Apply `event` with `message` on top of `status`, unless the table forbids
/// it; a forbidden change keeps the reported phase and message.
fn apply_event(
    machine: &PhaseStateMachine,
    status: &mut CephDeploymentStatus,
    event: PhaseEvent,
    message: String,
) {
    match machine.transition(status.phase, event) {
        TransitionResult::Success { from, to, description, .. } => {
            if from != to {
                debug!(from = %from, to = %to, event = %event, "{description}");
            }
            status.phase = to;
            status.message = message;
        }
        TransitionResult::InvalidTransition { current, event } => {
            warn!(phase = %current, event = %event, "Keeping reported phase");
        }
    }
}

/// `Ceph cluster <parts joined by "; ">`
fn deploying_message(parts: &[&str]) -> String {
    format!("Ceph cluster {}", parts.join("; "))
}

/// Count a failing pass; report Failed once the streak reaches the threshold.
fn apply_failure(
    machine: &PhaseStateMachine,
    failures: &FailureTracker,
    key: &str,
    status: &mut CephDeploymentStatus,
    message: String,
) {
    let streak = failures.record_failure(key);
    if streak < FAILURE_THRESHOLD {
        debug!(deployment = %key, streak, "Failing pass, keeping reported phase");
        return;
    }
    apply_event(machine, status, PhaseEvent::FailureThresholdReached, message);
}

/// Decide the next status and requeue of a pass.
pub fn decide(input: PhaseInput, previous: &CephDeploymentStatus, failures: &FailureTracker) -> PhaseDecision {
    let machine = PhaseStateMachine::new();
    let mut status = previous.clone();
    if let Some(validation) = input.validation {
        status.validation = validation;
    }
    if let Some(version) = input.cluster_version {
        status.cluster_version = version;
    }
    if let Some(refs) = input.obj_refs {
        status.obj_refs = refs;
    }
    status.last_run = input.now;

    let key = input.key.as_str();
    let mut requeue = Requeue::After(input.interval);
    let mut persist = true;

    match input.outcome {
        PassOutcome::Deletion(deletion) => {
            failures.reset(key);
            let message = match deletion {
                DeletionOutcome::Started => {
                    requeue = Requeue::Immediate;
                    DELETION_IN_PROGRESS.to_string()
                }
                DeletionOutcome::InProgress => DELETION_IN_PROGRESS.to_string(),
                DeletionOutcome::Failing(e) if e.is_empty() => DELETION_FAILING.to_string(),
                DeletionOutcome::Failing(e) => e,
                DeletionOutcome::Finished => {
                    requeue = Requeue::None;
                    persist = false;
                    DELETION_IN_PROGRESS.to_string()
                }
                DeletionOutcome::FinalizerRemovalFailed => FINALIZER_REMOVAL_FAILED.to_string(),
            };
            apply_event(&machine, &mut status, PhaseEvent::DeletionRequested, message);
        }
        PassOutcome::NodeExpansionFailed(message) => {
            failures.reset(key);
            apply_event(&machine, &mut status, PhaseEvent::NodeExpansionFailed, message);
        }
        PassOutcome::ValidationFailed => {
            failures.reset(key);
            let message = format!(
                "validation of CephDeployment spec is failed: {}",
                status.validation.messages.join(", ")
            );
            apply_event(&machine, &mut status, PhaseEvent::ValidationFailed, message);
        }
        PassOutcome::FinalizerAdded => {
            failures.reset(key);
            requeue = Requeue::Immediate;
        }
        PassOutcome::MultipleDeployments(message) => {
            failures.reset(key);
            apply_event(&machine, &mut status, PhaseEvent::MultipleDeployments, message);
        }
        PassOutcome::NamespaceCheckFailed(message) => {
            apply_failure(&machine, failures, key, &mut status, message);
        }
        PassOutcome::VersionCheckFailed(message) => {
            failures.reset(key);
            apply_event(&machine, &mut status, PhaseEvent::VersionCheckFailed, message);
        }
        PassOutcome::SetupFailed(message) => {
            failures.reset(key);
            apply_event(&machine, &mut status, PhaseEvent::SetupVerificationFailed, message);
        }
        PassOutcome::LifecycleCheckFailed(message) => {
            apply_failure(&machine, failures, key, &mut status, message);
        }
        PassOutcome::Held(hold) => {
            let (event, message) = match hold {
                LifecycleHold::OnHold => (PhaseEvent::RemovalTaskActive, ON_HOLD_MESSAGE),
                LifecycleHold::Maintenance => (PhaseEvent::MaintenanceActing, MAINTENANCE_MESSAGE),
            };
            if input.subobject_issues.is_some() {
                failures.record_failure(key);
            } else {
                failures.reset(key);
            }
            apply_event(&machine, &mut status, event, message.to_string());
        }
        PassOutcome::Applied(apply) => {
            let apply_message = apply.message();
            let mut parts = Vec::new();
            if let Some(issues) = input.subobject_issues.as_deref() {
                parts.push(issues);
            }
            if !apply_message.is_empty() {
                parts.push(apply_message.as_str());
            }
            let failing = apply.has_failures() || input.subobject_issues.is_some();
            if failing {
                apply_failure(&machine, failures, key, &mut status, deploying_message(&parts));
            } else {
                failures.reset(key);
                if parts.is_empty() {
                    apply_event(&machine, &mut status, PhaseEvent::ApplySucceeded, READY_MESSAGE.to_string());
                } else {
                    apply_event(
                        &machine,
                        &mut status,
                        PhaseEvent::ApplyInProgress,
                        deploying_message(&parts),
                    );
                }
            }
        }
    }

    PhaseDecision {
        status,
        persist,
        requeue,
    }
}
