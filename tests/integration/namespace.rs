//! Throwaway namespaces for isolated tests.
//!
//! Tests using [`TestNamespace`] must run on the multi-threaded runtime
//! (`#[tokio::test(flavor = "multi_thread")]`): cleanup blocks in `Drop`.

use ceph_deployment_operator::crd::CephDeployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::{Client, ResourceExt};
use serde_json::json;
use uuid::Uuid;

/// A namespace deleted, with everything in it, when dropped.
pub struct TestNamespace {
    client: Client,
    name: String,
}

impl TestNamespace {
    /// Create `<prefix>-<8 hex chars>`.
    pub async fn create(client: Client, prefix: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{prefix}-{}", &suffix[..8]);

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(
                    [(
                        "app.kubernetes.io/managed-by".to_string(),
                        "ceph-deployment-operator-test".to_string(),
                    )]
                    .into(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        Api::<Namespace>::all(client.clone())
            .create(&PostParams::default(), &namespace)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test namespace {name}: {e}"));
        tracing::info!(namespace = %name, "Created test namespace");

        Self { client, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespaced API for `K` in this namespace.
    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.name)
    }

    /// Drop our finalizer from every CephDeployment left behind; the scoped
    /// operator is gone by the time the namespace is cleaned up.
    async fn release_deployments(&self) {
        let api: Api<CephDeployment> = self.api();
        let Ok(list) = api.list(&Default::default()).await else {
            return;
        };
        let patch = Patch::Merge(json!({"metadata": {"finalizers": null}}));
        for dpl in list.items.iter().filter(|d| !d.finalizers().is_empty()) {
            if let Err(e) = api.patch(&dpl.name_any(), &PatchParams::default(), &patch).await {
                tracing::warn!(name = %dpl.name_any(), error = %e, "Failed to release CephDeployment");
            }
        }
    }

    async fn cleanup(&self) {
        self.release_deployments().await;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match Api::<Namespace>::all(self.client.clone())
            .delete(&self.name, &params)
            .await
        {
            Ok(_) => tracing::debug!(namespace = %self.name, "Namespace deletion initiated"),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => tracing::warn!(namespace = %self.name, error = %e, "Failed to delete test namespace"),
        }
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.cleanup());
        });
    }
}
