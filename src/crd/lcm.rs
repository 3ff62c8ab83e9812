//! Companion `lcm.mirantis.com/v1alpha1` resources.
//!
//! - `CephDeploymentHealth`, `CephDeploymentSecret` and
//!   `CephDeploymentMaintenance` share the name of their CephDeployment and
//!   are owned by it.
//! - `CephOsdRemoveTask` is read to decide whether the reconcile is on hold.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Health report companion. Filled by a separate health controller.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lcm.mirantis.com",
    version = "v1alpha1",
    kind = "CephDeploymentHealth",
    plural = "cephdeploymenthealths",
    shortname = "cephdplhealth",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephDeploymentHealthSpec {}

/// Secret reference companion. Filled by a separate secret controller.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lcm.mirantis.com",
    version = "v1alpha1",
    kind = "CephDeploymentSecret",
    plural = "cephdeploymentsecrets",
    shortname = "cephdplsecret",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephDeploymentSecretSpec {}

/// Maintenance lock companion.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lcm.mirantis.com",
    version = "v1alpha1",
    kind = "CephDeploymentMaintenance",
    plural = "cephdeploymentmaintenances",
    shortname = "cephdplmaintenance",
    status = "CephDeploymentMaintenanceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephDeploymentMaintenanceSpec {}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephDeploymentMaintenanceStatus {
    #[serde(default)]
    pub state: MaintenanceState,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum MaintenanceState {
    #[default]
    Idle,
    Acting,
    Failing,
}

impl CephDeploymentMaintenance {
    /// A maintenance that is acting or failing pauses the reconcile.
    pub fn is_acting(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            matches!(s.state, MaintenanceState::Acting | MaintenanceState::Failing)
        })
    }
}

/// Request to remove OSDs or whole nodes from the cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lcm.mirantis.com",
    version = "v1alpha1",
    kind = "CephOsdRemoveTask",
    plural = "cephosdremovetasks",
    status = "CephOsdRemoveTaskStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephOsdRemoveTaskSpec {
    /// Keep a failed task around without holding the reconcile.
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephOsdRemoveTaskStatus {
    #[serde(default)]
    pub phase: TaskPhase,
    #[serde(default)]
    pub conditions: Vec<TaskCondition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCondition {
    pub phase: TaskPhase,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum TaskPhase {
    #[default]
    Pending,
    Validating,
    ValidationFailed,
    WaitingOperator,
    ApproveWaiting,
    Processing,
    Completed,
    CompletedWithWarnings,
    Aborted,
    Failed,
}

impl CephOsdRemoveTask {
    /// Whether this task holds the CephDeployment reconcile.
    ///
    /// A failed task holds only when it failed during processing and was not
    /// marked resolved.
    pub fn holds_reconcile(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        match status.phase {
            TaskPhase::Validating
            | TaskPhase::WaitingOperator
            | TaskPhase::ApproveWaiting
            | TaskPhase::Processing => true,
            TaskPhase::Failed => {
                let failed_in_processing = status
                    .conditions
                    .iter()
                    .rev()
                    .nth(1)
                    .is_some_and(|c| c.phase == TaskPhase::Processing);
                failed_in_processing && !self.spec.resolved
            }
            _ => false,
        }
    }
}
