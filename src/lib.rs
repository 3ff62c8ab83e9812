//! ceph-deployment-operator library crate
//!
//! This module exports the controller, CRD definitions, resource generators
//! and the object store seam the controller runs on.

pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod store;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::config::OperatorConfig;
use controller::{context::Context, reconciler::reconcile};
use crd::{CephCluster, CephDeployment, CephDeploymentHealth, CephDeploymentMaintenance};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// This ensures consistent behavior across all controllers:
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run the operator controller, scoped to `config.watch_namespace` when set.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(client: Client, health_state: Option<Arc<HealthState>>, config: OperatorConfig) {
    let namespace = config.watch_namespace.clone();
    run_controller_scoped(client, health_state, config, namespace.as_deref()).await
}

/// Run the operator controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches CephDeployments in that
/// namespace. Rook children are always watched in the Rook namespace.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: OperatorConfig,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        rook_namespace = %config.rook_namespace,
        "Starting controller for CephDeployment resources (scope: {})",
        scope_msg
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let clusters: Api<CephCluster> = Api::namespaced(client.clone(), &config.rook_namespace);
    let ctx = Arc::new(Context::new(client.clone(), health_state, config));

    let deployments: Api<CephDeployment> = scoped_api(client.clone(), namespace);
    let healths: Api<CephDeploymentHealth> = scoped_api(client.clone(), namespace);
    let maintenances: Api<CephDeploymentMaintenance> = scoped_api(client.clone(), namespace);

    // Use consistent watcher configuration across all controllers
    let watcher_config = default_watcher_config();

    // Create filtered stream with standard optimizations (reflector, backoff, generation predicate)
    let (reader, resource_stream) = create_filtered_stream(deployments, watcher_config.clone());

    // CephClusters live in the Rook namespace and carry no owner reference;
    // map them back to the CephDeployment of the same name.
    let cluster_reader = reader.clone();
    let cluster_mapper = move |cluster: CephCluster| {
        let name = cluster.name_any();
        cluster_reader
            .state()
            .into_iter()
            .filter(move |dpl| dpl.name_any() == name)
            .map(|dpl| ObjectRef::from_obj(dpl.as_ref()))
            .collect::<Vec<_>>()
    };

    // Companions only matter for existence, so a metadata watch is enough;
    // maintenance state changes need the full object.
    Controller::for_stream(resource_stream, reader)
        .owns(maintenances, watcher_config.clone())
        .owns_stream(metadata_watcher(healths, watcher_config.clone()).touched_objects())
        .watches(clusters, watcher_config, cluster_mapper)
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound/NotFound errors are expected after deletion when
                    // related watch events trigger reconciliation for a deleted object.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
