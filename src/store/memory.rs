//! In-memory [`ObjectStore`] used by the functional tests and dry runs.
//!
//! Mirrors the API server semantics the engine relies on:
//! - resourceVersion is bumped on every write and checked on update
//! - `update` keeps the stored status, `replace_status` only touches status
//! - deleting an object with finalizers only marks it for deletion
//! - failures can be injected per operation and object name

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::exec::{CephCli, ScriptedCli};
use super::{ObjectStore, Stores};
use crate::controller::config::DEFAULT_OPENSTACK_SHARED_NAMESPACE;
use crate::controller::error::{Error, Result};
use crate::crd::{
    CephBlockPool, CephClient, CephCluster, CephDeployment, CephDeploymentHealth,
    CephDeploymentMaintenance, CephDeploymentSecret, CephFilesystem, CephObjectRealm,
    CephObjectStore, CephObjectZone, CephObjectZoneGroup, CephOsdRemoveTask, CephRBDMirror,
};

/// Store operations, used for the call log and failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// One recorded store call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub name: String,
}

/// Matches any object name when injecting failures.
pub const ANY_NAME: &str = "*";

pub struct MemoryStore<K> {
    namespace: Option<String>,
    objects: Mutex<BTreeMap<String, K>>,
    failures: Mutex<HashMap<(StoreOp, String), String>>,
    calls: Mutex<Vec<StoreCall>>,
    version: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a store for a namespace (`None` for cluster-scoped kinds).
    pub fn new(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            objects: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Insert or overwrite an object without recording a call.
    pub fn seed(&self, mut obj: K) -> K {
        self.stamp(&mut obj);
        let name = obj.name_any();
        lock(&self.objects).insert(name, obj.clone());
        obj
    }

    /// Current copy of an object without recording a call.
    pub fn snapshot(&self, name: &str) -> Option<K> {
        lock(&self.objects).get(name).cloned()
    }

    /// Names of every stored object, sorted.
    pub fn names(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }

    /// Make `op` on `name` (or [`ANY_NAME`]) fail until cleared.
    pub fn fail_on(&self, op: StoreOp, name: &str, message: &str) {
        lock(&self.failures).insert((op, name.to_string()), message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Recorded calls, oldest first.
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Recorded mutating calls (create, update, status, delete).
    pub fn writes(&self) -> Vec<StoreCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| !matches!(c.op, StoreOp::List | StoreOp::Get))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, op: StoreOp, name: &str) -> Result<()> {
        lock(&self.calls).push(StoreCall {
            op,
            name: name.to_string(),
        });
        let failures = lock(&self.failures);
        let injected = failures
            .get(&(op, name.to_string()))
            .or_else(|| failures.get(&(op, ANY_NAME.to_string())));
        match injected {
            Some(message) => Err(Error::Transient(message.clone())),
            None => Ok(()),
        }
    }

    fn stamp(&self, obj: &mut K) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.to_string());
        if meta.namespace.is_none() {
            meta.namespace = self.namespace.clone();
        }
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }
}

/// Copy the `status` block of `from` onto `to`.
fn with_status<K>(to: &K, from: &K) -> Result<K>
where
    K: Serialize + DeserializeOwned,
{
    let mut target = serde_json::to_value(to)?;
    let source = serde_json::to_value(from)?;
    if let Some(map) = target.as_object_mut() {
        match source.get("status") {
            Some(status) => {
                map.insert("status".to_string(), status.clone());
            }
            None => {
                map.remove("status");
            }
        }
    }
    Ok(serde_json::from_value(target)?)
}

/// Simple equality/existence selector: `a=b,c`.
fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>> {
        self.record(StoreOp::List, ANY_NAME)?;
        let objects = lock(&self.objects);
        Ok(objects
            .values()
            .filter(|obj| label_selector.is_none_or(|s| matches_selector(obj.labels(), s)))
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> Result<Option<K>> {
        self.record(StoreOp::Get, name)?;
        Ok(lock(&self.objects).get(name).cloned())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.record(StoreOp::Create, &name)?;
        let mut objects = lock(&self.objects);
        if objects.contains_key(&name) {
            return Err(Error::Conflict {
                kind: Self::kind(),
                name,
                reason: "already exists".to_string(),
            });
        }
        let mut created = obj.clone();
        self.stamp(&mut created);
        objects.insert(name, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.record(StoreOp::Update, &name)?;
        let mut objects = lock(&self.objects);
        let Some(current) = objects.get(&name) else {
            return Err(Error::not_found(&Self::kind(), &name));
        };
        if let Some(version) = obj.meta().resource_version.as_ref()
            && current.meta().resource_version.as_ref() != Some(version)
        {
            return Err(Error::Conflict {
                kind: Self::kind(),
                name,
                reason: "the object has been modified".to_string(),
            });
        }
        let mut updated = with_status(obj, current)?;
        updated.meta_mut().deletion_timestamp = current.meta().deletion_timestamp.clone();
        self.stamp(&mut updated);
        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&name);
        } else {
            objects.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.record(StoreOp::UpdateStatus, &name)?;
        let mut objects = lock(&self.objects);
        let Some(current) = objects.get(&name) else {
            return Err(Error::not_found(&Self::kind(), &name));
        };
        let mut updated = with_status(current, obj)?;
        self.stamp(&mut updated);
        objects.insert(name, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.record(StoreOp::Delete, name)?;
        let mut objects = lock(&self.objects);
        let Some(current) = objects.get_mut(name) else {
            return Err(Error::not_found(&Self::kind(), name));
        };
        if current.finalizers().is_empty() {
            objects.remove(name);
        } else if current.meta().deletion_timestamp.is_none() {
            current.meta_mut().deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        }
        Ok(())
    }
}

/// Typed handles to a full set of memory stores.
///
/// `stores()` hands the same objects to the engine as a [`Stores`] table, so
/// tests can seed and inspect state through the typed fields.
#[derive(Clone)]
pub struct MemoryStores {
    pub deployments: Arc<MemoryStore<CephDeployment>>,
    pub healths: Arc<MemoryStore<CephDeploymentHealth>>,
    pub lcm_secrets: Arc<MemoryStore<CephDeploymentSecret>>,
    pub maintenances: Arc<MemoryStore<CephDeploymentMaintenance>>,
    pub osd_remove_tasks: Arc<MemoryStore<CephOsdRemoveTask>>,
    pub namespace_secrets: Arc<MemoryStore<Secret>>,
    pub shared_secrets: Arc<MemoryStore<Secret>>,

    pub clusters: Arc<MemoryStore<CephCluster>>,
    pub block_pools: Arc<MemoryStore<CephBlockPool>>,
    pub clients: Arc<MemoryStore<CephClient>>,
    pub filesystems: Arc<MemoryStore<CephFilesystem>>,
    pub object_stores: Arc<MemoryStore<CephObjectStore>>,
    pub realms: Arc<MemoryStore<CephObjectRealm>>,
    pub zone_groups: Arc<MemoryStore<CephObjectZoneGroup>>,
    pub zones: Arc<MemoryStore<CephObjectZone>>,
    pub rbd_mirrors: Arc<MemoryStore<CephRBDMirror>>,

    pub secrets: Arc<MemoryStore<Secret>>,
    pub config_maps: Arc<MemoryStore<ConfigMap>>,
    pub services: Arc<MemoryStore<Service>>,
    pub ingresses: Arc<MemoryStore<Ingress>>,
    pub network_policies: Arc<MemoryStore<NetworkPolicy>>,
    pub rook_deployments: Arc<MemoryStore<Deployment>>,
    pub rook_daemon_sets: Arc<MemoryStore<DaemonSet>>,

    pub storage_classes: Arc<MemoryStore<StorageClass>>,
    pub nodes: Arc<MemoryStore<Node>>,

    pub cli: Arc<ScriptedCli>,
}

impl MemoryStores {
    pub fn new(namespace: &str, rook_namespace: &str) -> Self {
        let ns = Some(namespace);
        let rook = Some(rook_namespace);
        Self {
            deployments: Arc::new(MemoryStore::new(ns)),
            healths: Arc::new(MemoryStore::new(ns)),
            lcm_secrets: Arc::new(MemoryStore::new(ns)),
            maintenances: Arc::new(MemoryStore::new(ns)),
            osd_remove_tasks: Arc::new(MemoryStore::new(ns)),
            namespace_secrets: Arc::new(MemoryStore::new(ns)),
            shared_secrets: Arc::new(MemoryStore::new(Some(DEFAULT_OPENSTACK_SHARED_NAMESPACE))),

            clusters: Arc::new(MemoryStore::new(rook)),
            block_pools: Arc::new(MemoryStore::new(rook)),
            clients: Arc::new(MemoryStore::new(rook)),
            filesystems: Arc::new(MemoryStore::new(rook)),
            object_stores: Arc::new(MemoryStore::new(rook)),
            realms: Arc::new(MemoryStore::new(rook)),
            zone_groups: Arc::new(MemoryStore::new(rook)),
            zones: Arc::new(MemoryStore::new(rook)),
            rbd_mirrors: Arc::new(MemoryStore::new(rook)),

            secrets: Arc::new(MemoryStore::new(rook)),
            config_maps: Arc::new(MemoryStore::new(rook)),
            services: Arc::new(MemoryStore::new(rook)),
            ingresses: Arc::new(MemoryStore::new(rook)),
            network_policies: Arc::new(MemoryStore::new(rook)),
            rook_deployments: Arc::new(MemoryStore::new(rook)),
            rook_daemon_sets: Arc::new(MemoryStore::new(rook)),

            storage_classes: Arc::new(MemoryStore::new(None)),
            nodes: Arc::new(MemoryStore::new(None)),

            cli: Arc::new(ScriptedCli::default()),
        }
    }

    /// The engine-facing table sharing these stores.
    pub fn stores(&self) -> Stores {
        Stores {
            deployments: self.deployments.clone(),
            healths: self.healths.clone(),
            lcm_secrets: self.lcm_secrets.clone(),
            maintenances: self.maintenances.clone(),
            osd_remove_tasks: self.osd_remove_tasks.clone(),
            namespace_secrets: self.namespace_secrets.clone(),
            shared_secrets: self.shared_secrets.clone(),

            clusters: self.clusters.clone(),
            block_pools: self.block_pools.clone(),
            clients: self.clients.clone(),
            filesystems: self.filesystems.clone(),
            object_stores: self.object_stores.clone(),
            realms: self.realms.clone(),
            zone_groups: self.zone_groups.clone(),
            zones: self.zones.clone(),
            rbd_mirrors: self.rbd_mirrors.clone(),

            secrets: self.secrets.clone(),
            config_maps: self.config_maps.clone(),
            services: self.services.clone(),
            ingresses: self.ingresses.clone(),
            network_policies: self.network_policies.clone(),
            rook_deployments: self.rook_deployments.clone(),
            rook_daemon_sets: self.rook_daemon_sets.clone(),

            storage_classes: self.storage_classes.clone(),
            nodes: self.nodes.clone(),

            cli: self.cli.clone() as Arc<dyn CephCli>,
        }
    }
}
