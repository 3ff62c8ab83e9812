//! Object store seam between the convergence engine and the Kubernetes API.
//!
//! Every kind the engine reads or writes goes through [`ObjectStore`]. The
//! production table ([`Stores::kube`]) is backed by `kube::Api`; the
//! functional tests drive the same engine through [`memory::MemoryStores`].

pub mod exec;
pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::config::OperatorConfig;
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{
    CephBlockPool, CephClient, CephCluster, CephDeployment, CephDeploymentHealth,
    CephDeploymentMaintenance, CephDeploymentSecret, CephFilesystem, CephObjectRealm,
    CephObjectStore, CephObjectZone, CephObjectZoneGroup, CephOsdRemoveTask, CephRBDMirror,
};
use exec::{CephCli, ToolboxCli};

/// Typed access to one kind in one namespace (or cluster-wide).
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync,
{
    /// List objects, optionally filtered by a `key=value[,key]` label selector.
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>>;

    /// Fetch an object; `None` when it does not exist.
    async fn get(&self, name: &str) -> Result<Option<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace an object. Fails with `Conflict` on a stale resourceVersion.
    async fn update(&self, obj: &K) -> Result<K>;

    /// Replace the status block of an object.
    async fn replace_status(&self, obj: &K) -> Result<K>;

    /// Delete an object. A missing object surfaces as `Error::NotFound`.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Shared handle to a typed store.
pub type Store<K> = Arc<dyn ObjectStore<K>>;

/// [`ObjectStore`] backed by a `kube::Api`.
pub struct KubeStore<K>
where
    K: Resource,
{
    api: Api<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = ()>,
{
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

/// Map API status codes onto the store error variants.
fn classify<K>(name: &str, err: kube::Error) -> Error
where
    K: Resource<DynamicType = ()>,
{
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::not_found(&K::kind(&()), name),
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            kind: K::kind(&()).to_string(),
            name: name.to_string(),
            reason: resp.message.clone(),
        },
        _ => Error::Kube(err),
    }
}

fn object_name<K: Resource>(obj: &K) -> Result<String> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| Error::MissingField("metadata.name".to_string()))
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self.api.list(&params).await?;
        Ok(list.items)
    }

    async fn get(&self, name: &str) -> Result<Option<K>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api
            .create(&pp, obj)
            .await
            .map_err(|e| classify::<K>(&name, e))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api
            .replace(&name, &pp, obj)
            .await
            .map_err(|e| classify::<K>(&name, e))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let value = serde_json::to_value(obj)?;
        let status = value
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = serde_json::json!({ "status": status });
        self.api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify::<K>(&name, e))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify::<K>(name, e))
    }
}

/// Handler table of every store the engine touches.
///
/// Companion LCM objects live in the CephDeployment namespace; Rook children
/// and their platform objects live in the Rook namespace; nodes and storage
/// classes are cluster-scoped. The OpenStack shared secret lives in its own
/// namespace.
#[derive(Clone)]
pub struct Stores {
    pub deployments: Store<CephDeployment>,
    pub healths: Store<CephDeploymentHealth>,
    pub lcm_secrets: Store<CephDeploymentSecret>,
    pub maintenances: Store<CephDeploymentMaintenance>,
    pub osd_remove_tasks: Store<CephOsdRemoveTask>,
    /// Secrets in the CephDeployment namespace.
    pub namespace_secrets: Store<Secret>,
    /// Secrets in the OpenStack shared namespace.
    pub shared_secrets: Store<Secret>,

    pub clusters: Store<CephCluster>,
    pub block_pools: Store<CephBlockPool>,
    pub clients: Store<CephClient>,
    pub filesystems: Store<CephFilesystem>,
    pub object_stores: Store<CephObjectStore>,
    pub realms: Store<CephObjectRealm>,
    pub zone_groups: Store<CephObjectZoneGroup>,
    pub zones: Store<CephObjectZone>,
    pub rbd_mirrors: Store<CephRBDMirror>,

    pub secrets: Store<Secret>,
    pub config_maps: Store<ConfigMap>,
    pub services: Store<Service>,
    pub ingresses: Store<Ingress>,
    pub network_policies: Store<NetworkPolicy>,
    pub rook_deployments: Store<Deployment>,
    pub rook_daemon_sets: Store<DaemonSet>,

    pub storage_classes: Store<StorageClass>,
    pub nodes: Store<Node>,

    /// Bridge to the ceph toolbox.
    pub cli: Arc<dyn CephCli>,
}

impl Stores {
    /// Build the production table for a CephDeployment in `namespace`.
    pub fn kube(client: Client, namespace: &str, config: &OperatorConfig) -> Self {
        let rook = config.rook_namespace.as_str();
        Self {
            deployments: namespaced(&client, namespace),
            healths: namespaced(&client, namespace),
            lcm_secrets: namespaced(&client, namespace),
            maintenances: namespaced(&client, namespace),
            osd_remove_tasks: namespaced(&client, namespace),
            namespace_secrets: namespaced(&client, namespace),
            shared_secrets: namespaced(&client, &config.openstack_shared_namespace),

            clusters: namespaced(&client, rook),
            block_pools: namespaced(&client, rook),
            clients: namespaced(&client, rook),
            filesystems: namespaced(&client, rook),
            object_stores: namespaced(&client, rook),
            realms: namespaced(&client, rook),
            zone_groups: namespaced(&client, rook),
            zones: namespaced(&client, rook),
            rbd_mirrors: namespaced(&client, rook),

            secrets: namespaced(&client, rook),
            config_maps: namespaced(&client, rook),
            services: namespaced(&client, rook),
            ingresses: namespaced(&client, rook),
            network_policies: namespaced(&client, rook),
            rook_deployments: namespaced(&client, rook),
            rook_daemon_sets: namespaced(&client, rook),

            storage_classes: Arc::new(KubeStore::new(Api::all(client.clone()))),
            nodes: Arc::new(KubeStore::new(Api::all(client.clone()))),

            cli: Arc::new(ToolboxCli::new(client, rook, config.exec_timeout)),
        }
    }
}

fn namespaced<K>(client: &Client, namespace: &str) -> Store<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    Arc::new(KubeStore::new(Api::namespaced(client.clone(), namespace)))
}
