//! Reconciliation loop for CephDeployment.
//!
//! One pass walks a fixed order: deletion, the one-deployment-per-namespace
//! check, node expansion, validation, finalizer, version check, companion
//! objects, setup checks, lifecycle holds and finally the apply steps.
//! [`evaluate`] gathers what happened into a [`PhaseInput`]; [`run_pass`]
//! turns it into a status through [`decide`] and persists it. The kube-runtime entry points wrap
//! [`run_pass`] with events and metrics.

use std::sync::Arc;
use std::time::Instant;

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::apply::run_steps;
use crate::controller::common::{FINALIZER, add_finalizer, deployment_key, now_rfc3339, remove_finalizer};
use crate::controller::config::OperatorConfig;
use crate::controller::context::{Context, UpdateTimestamps};
use crate::controller::error::{Error, Result};
use crate::controller::lifecycle::check_lifecycle;
use crate::controller::nodes::expand_nodes;
use crate::controller::pass::PassContext;
use crate::controller::phase::{
    DeletionOutcome, FailureTracker, PassOutcome, PhaseDecision, PhaseInput, Requeue, decide,
};
use crate::controller::setup::verify_setup;
use crate::controller::status::persist_status;
use crate::controller::subobjects::ensure_subobjects;
use crate::controller::teardown::{TeardownTarget, teardown};
use crate::controller::validation::validate;
use crate::controller::version::check_version;
use crate::crd::{CephDeployment, DeploymentPhase, ValidationResult};
use crate::store::Stores;

/// Everything a pass needs besides the deployment itself.
pub struct PassEnv<'a> {
    pub stores: &'a Stores,
    pub config: &'a OperatorConfig,
    pub timestamps: &'a UpdateTimestamps,
    pub failures: &'a FailureTracker,
}

/// Result of one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PassReport {
    pub decision: PhaseDecision,
    /// Apply steps that failed during this pass.
    pub failed_steps: Vec<&'static str>,
}

impl PassReport {
    /// The deployment is gone for good.
    pub fn is_removed(&self) -> bool {
        !self.decision.persist && self.decision.requeue == Requeue::None
    }
}

fn has_finalizer(dpl: &CephDeployment) -> bool {
    dpl.finalizers().iter().any(|f| f == FINALIZER)
}

/// One teardown pass; the first pass only reports the deletion.
async fn handle_deletion(dpl: &CephDeployment, env: &PassEnv<'_>) -> DeletionOutcome {
    let name = dpl.name_any();
    let namespace = dpl.namespace().unwrap_or_default();
    if !has_finalizer(dpl) {
        return DeletionOutcome::Finished;
    }
    let reported = dpl.status.as_ref().map(|s| s.phase);
    if reported != Some(DeploymentPhase::Deleting) {
        info!(name = %name, namespace = %namespace, "Switching to remove phase for CephDeployment");
        return DeletionOutcome::Started;
    }

    let target = TeardownTarget {
        name: &name,
        namespace: &namespace,
        rook_namespace: &env.config.rook_namespace,
        external: dpl.spec.external,
        openstack_shared_namespace: &env.config.openstack_shared_namespace,
        disable_os_keys: dpl.spec.disable_os_keys(),
        timestamps: env.timestamps,
        stores: env.stores,
    };
    match teardown(&target).await {
        Err(e) => {
            error!(name = %name, namespace = %namespace, error = %e, "Failed to delete CephDeployment");
            DeletionOutcome::Failing(e)
        }
        Ok(false) => DeletionOutcome::InProgress,
        Ok(true) => {
            info!(name = %name, namespace = %namespace, "Finished CephDeployment resource cleanup");
            match remove_finalizer(env.stores.deployments.as_ref(), &name, FINALIZER).await {
                Ok(()) => DeletionOutcome::Finished,
                Err(e) => {
                    error!(name = %name, error = %e, "Failed to remove finalizer");
                    DeletionOutcome::FinalizerRemovalFailed
                }
            }
        }
    }
}

/// Run every check and step of one pass and collect what happened.
pub async fn evaluate(dpl: &CephDeployment, env: &PassEnv<'_>) -> PhaseInput {
    let mut input = PhaseInput {
        key: deployment_key(dpl),
        outcome: PassOutcome::FinalizerAdded,
        validation: None,
        cluster_version: None,
        obj_refs: None,
        subobject_issues: None,
        now: now_rfc3339(),
        interval: env.config.requeue_interval,
    };
    let name = dpl.name_any();

    if dpl.metadata.deletion_timestamp.is_some() {
        if !dpl.spec.prevent_cluster_destroy() {
            input.outcome = PassOutcome::Deletion(handle_deletion(dpl, env).await);
            return input;
        }
        warn!(
            deployment = %input.key,
            "CephDeployment is going to be removed, but preventClusterDestroy is set"
        );
    }

    match env.stores.deployments.list(None).await {
        Ok(found) if found.len() > 1 => {
            let namespace = dpl.namespace().unwrap_or_default();
            let message = format!("incorrect number of CephDeployments in {namespace} namespace");
            error!(deployment = %input.key, "{message}");
            input.outcome = PassOutcome::MultipleDeployments(message);
            return input;
        }
        Ok(_) => {}
        Err(e) => {
            let namespace = dpl.namespace().unwrap_or_default();
            error!(deployment = %input.key, error = %e, "Failed to list CephDeployments");
            input.outcome = PassOutcome::NamespaceCheckFailed(format!(
                "failed to list CephDeployments {namespace} namespace: {e}"
            ));
            return input;
        }
    }

    let nodes = match expand_nodes(&dpl.spec, env.stores.nodes.as_ref()).await {
        Ok(nodes) => nodes,
        Err(e) => {
            error!(deployment = %input.key, error = %e, "Failed to expand node list");
            input.outcome = PassOutcome::NodeExpansionFailed(format!(
                "failed to expand node list for CephDeployment {}",
                input.key
            ));
            return input;
        }
    };

    let validation = validate(
        &dpl.spec,
        &nodes,
        dpl.metadata.generation.unwrap_or_default(),
        &env.config.rook_namespace,
    );
    let failed = validation.result == Some(ValidationResult::Failed);
    input.validation = Some(validation);
    if failed {
        input.outcome = PassOutcome::ValidationFailed;
        return input;
    }

    if !has_finalizer(dpl) {
        match add_finalizer(env.stores.deployments.as_ref(), &name, FINALIZER).await {
            Ok(_) => info!(deployment = %input.key, "Added finalizer"),
            Err(e) => warn!(deployment = %input.key, error = %e, "Failed to add finalizer"),
        }
        input.outcome = PassOutcome::FinalizerAdded;
        return input;
    }

    match check_version(env.stores, &env.config.ceph_image).await {
        Ok(version) => input.cluster_version = version,
        Err(e) => {
            error!(deployment = %input.key, error = %e, "Failed to verify Ceph version");
            input.outcome = PassOutcome::VersionCheckFailed(e);
            return input;
        }
    }

    let (refs, issues) = ensure_subobjects(env.stores, dpl).await;
    input.obj_refs = Some(refs);
    input.subobject_issues = issues;

    if let Err(e) = verify_setup(env.stores, env.config, &name).await {
        error!(deployment = %input.key, error = %e, "Failed to verify Ceph setup");
        input.outcome = PassOutcome::SetupFailed(e);
        return input;
    }

    let namespace = dpl.namespace().unwrap_or_default();
    match check_lifecycle(env.stores, &name, &namespace, dpl.spec.external).await {
        Err(e) => {
            error!(deployment = %input.key, error = %e, "Failed to check lifecycle state");
            input.outcome = PassOutcome::LifecycleCheckFailed(e);
            return input;
        }
        Ok(Some(hold)) => {
            input.outcome = PassOutcome::Held(hold);
            return input;
        }
        Ok(None) => {}
    }

    let pass = PassContext::new(dpl, nodes, env.config, env.timestamps, env.stores);
    input.outcome = PassOutcome::Applied(run_steps(&pass).await);
    input
}

/// Evaluate, decide and persist one pass.
pub async fn run_pass(dpl: &CephDeployment, env: &PassEnv<'_>) -> Result<PassReport> {
    let input = evaluate(dpl, env).await;
    let failed_steps = match &input.outcome {
        PassOutcome::Applied(apply) => apply.failed_steps().map(|s| s.name).collect(),
        _ => Vec::new(),
    };
    let previous = dpl.status.clone().unwrap_or_default();
    let decision = decide(input, &previous, env.failures);
    if decision.persist {
        persist_status(env.stores.deployments.as_ref(), &dpl.name_any(), &decision.status).await?;
    }
    Ok(PassReport {
        decision,
        failed_steps,
    })
}

/// Reconcile a CephDeployment
///
/// This is the main reconciliation function called by the controller.
pub async fn reconcile(obj: Arc<CephDeployment>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling CephDeployment");

    let stores = Stores::kube(ctx.client.clone(), &namespace, &ctx.config);
    let env = PassEnv {
        stores: &stores,
        config: &ctx.config,
        timestamps: &ctx.timestamps,
        failures: &ctx.failures,
    };
    let report = run_pass(&obj, &env).await?;
    let status = &report.decision.status;

    let previous = obj.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if report.decision.persist && previous != status.phase {
        let note = Some(format!("{previous} -> {}: {}", status.phase, status.message));
        if status.phase == DeploymentPhase::Failed {
            ctx.publish_warning_event(&obj, "Failed", "Reconciling", note).await;
        } else {
            ctx.publish_normal_event(&obj, status.phase.to_string().as_str(), "Reconciling", note)
                .await;
        }
    }

    // Record metrics
    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        let metrics = &health_state.metrics;
        metrics.record_reconcile(&namespace, &name, duration);
        for step in &report.failed_steps {
            metrics.record_step_failure(&namespace, &name, step);
        }
        let phase = status.phase.to_string();
        metrics.set_phase(&namespace, &name, (!report.is_removed()).then_some(phase.as_str()));
    }

    Ok(report.decision.requeue.into())
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<CephDeployment>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(std::time::Duration::from_secs(300))
    }
}
