//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client, event recorder, operator configuration
//! and the only state kept between reconcile passes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::controller::config::OperatorConfig;
use crate::controller::phase::FailureTracker;
use crate::crd::CephDeployment;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "ceph-deployment-operator";

/// Per-section timestamps of the last ceph config change.
///
/// Keyed by CephDeployment `<namespace>/<name>`. The cephcluster step reads a
/// snapshot, and writes back the timestamps it decided on; teardown drops the
/// entry once the CephCluster is gone.
#[derive(Debug, Default)]
pub struct UpdateTimestamps {
    entries: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl UpdateTimestamps {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, String>>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy of the timestamps known for a deployment.
    pub fn snapshot(&self, key: &str) -> BTreeMap<String, String> {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn store(&self, key: &str, timestamps: BTreeMap<String, String>) {
        self.lock().insert(key.to_string(), timestamps);
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Settings read at startup
    pub config: Arc<OperatorConfig>,
    /// Consecutive failing passes per deployment
    pub failures: Arc<FailureTracker>,
    /// Ceph config section timestamps per deployment
    pub timestamps: Arc<UpdateTimestamps>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            config: Arc::new(config),
            failures: Arc::new(FailureTracker::default()),
            timestamps: Arc::new(UpdateTimestamps::default()),
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish(
        &self,
        resource: &CephDeployment,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a CephDeployment
    pub async fn publish_normal_event(
        &self,
        resource: &CephDeployment,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a CephDeployment
    pub async fn publish_warning_event(
        &self,
        resource: &CephDeployment,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
