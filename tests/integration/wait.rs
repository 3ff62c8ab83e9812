//! Watch-based waiting.

use std::fmt::Debug;
use std::time::Duration;

use ceph_deployment_operator::controller::common::FINALIZER;
use ceph_deployment_operator::crd::{CephDeployment, DeploymentPhase};
use futures::StreamExt;
use kube::Resource;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timeout waiting for condition after {0:?}")]
    Timeout(Duration),

    #[error("Resource was deleted while waiting")]
    ResourceDeleted,

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] watcher::Error),

    #[error("Watch stream ended unexpectedly")]
    StreamEnded,
}

fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

async fn watch_until<K, F>(api: &Api<K>, name: &str, condition: F) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    if let Some(obj) = api.get_opt(name).await?
        && condition(&obj)
    {
        return Ok(obj);
    }
    let mut stream = watcher::watcher(api.clone(), by_name(name)).boxed();
    while let Some(event) = stream.next().await {
        match event? {
            Event::Apply(obj) | Event::InitApply(obj) if condition(&obj) => return Ok(obj),
            Event::Delete(_) => return Err(WaitError::ResourceDeleted),
            _ => {}
        }
    }
    Err(WaitError::StreamEnded)
}

async fn watch_deletion<K>(api: &Api<K>, name: &str) -> Result<(), WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
{
    if api.get_opt(name).await?.is_none() {
        return Ok(());
    }
    let mut stream = watcher::watcher(api.clone(), by_name(name)).boxed();
    while let Some(event) = stream.next().await {
        if let Event::Delete(_) = event? {
            return Ok(());
        }
    }
    Err(WaitError::StreamEnded)
}

/// Wait until `name` exists and satisfies `condition`.
pub async fn wait_for_condition<K, F>(
    api: &Api<K>,
    name: &str,
    condition: F,
    limit: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    timeout(limit, watch_until(api, name, condition))
        .await
        .map_err(|_| WaitError::Timeout(limit))?
}

/// Wait until `name` exists.
pub async fn wait_for_resource<K>(api: &Api<K>, name: &str, limit: Duration) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
{
    wait_for_condition(api, name, |_| true, limit).await
}

/// Wait until `name` is gone.
pub async fn wait_for_deletion<K>(api: &Api<K>, name: &str, limit: Duration) -> Result<(), WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
{
    timeout(limit, watch_deletion(api, name))
        .await
        .map_err(|_| WaitError::Timeout(limit))?
}

pub fn is_phase(dpl: &CephDeployment, phase: DeploymentPhase) -> bool {
    dpl.status.as_ref().is_some_and(|s| s.phase == phase)
}

pub fn has_finalizer(dpl: &CephDeployment) -> bool {
    dpl.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == FINALIZER))
}

/// Whether the current generation went through validation.
pub fn generation_validated(dpl: &CephDeployment) -> bool {
    match (dpl.metadata.generation, &dpl.status) {
        (Some(generation), Some(status)) => status.validation.last_validated_generation == generation,
        _ => false,
    }
}

pub async fn wait_for_phase(
    api: &Api<CephDeployment>,
    name: &str,
    phase: DeploymentPhase,
    limit: Duration,
) -> Result<CephDeployment, WaitError> {
    wait_for_condition(api, name, |d| is_phase(d, phase), limit).await
}
