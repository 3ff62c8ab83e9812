//! Generic diff-and-apply over one child kind.
//!
//! Given the desired objects and a filtered live listing, [`converge`] plans
//! create = D\L, update = D∩L with a spec difference and delete = L\D, runs
//! every planned operation, and folds all failures into one step error.
//!
//! Per-kind behavior is supplied by the [`Convergent`] trait:
//! - `same_spec` / `adopt_spec` define what an update compares and copies
//! - `readiness` gates updates of items the child operator is still working on
//! - `preserve` keeps live items out of deletion

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::crd::{
    BUILTIN_POOLS, CephBlockPool, CephClient, CephFilesystem, CephObjectStore, CephObjectZone,
    CephObjectZoneGroup, CephRBDMirror, RookStatus,
};
use crate::store::ObjectStore;

/// Annotation keeping a live child out of deletion.
pub const PRESERVE_ANNOTATION: &str = "cephdeployment.lcm.mirantis.com/preserve-on-delete";

/// Rook phases during which a child must not be updated.
const NOT_READY_PHASES: [&str; 3] = ["Connecting", "Progressing", "Deleting"];

/// Result of one ensure step: `Ok(changed)` or a composed error message.
pub type StepOutcome = std::result::Result<bool, String>;

/// Whether a live child accepts updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady { phase: Option<String> },
}

/// Per-kind hooks used by [`converge`].
pub trait Convergent: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static {
    /// Whether the live object already matches `desired`.
    fn same_spec(&self, desired: &Self) -> bool;

    /// Copy the managed fields of `desired` onto the live object.
    fn adopt_spec(&mut self, desired: &Self);

    fn readiness(&self) -> Readiness {
        Readiness::Ready
    }

    /// Keep this live object even when it is no longer desired.
    fn preserve(&self) -> bool {
        false
    }
}

/// Readiness derived from a Rook status block.
pub fn rook_readiness(status: Option<&RookStatus>) -> Readiness {
    match status.and_then(|s| s.phase.as_deref()) {
        None => Readiness::NotReady { phase: None },
        Some(phase) if NOT_READY_PHASES.contains(&phase) => Readiness::NotReady {
            phase: Some(phase.to_string()),
        },
        Some(_) => Readiness::Ready,
    }
}

macro_rules! rook_convergent {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl Convergent for $kind {
                fn same_spec(&self, desired: &Self) -> bool {
                    self.spec == desired.spec
                }

                fn adopt_spec(&mut self, desired: &Self) {
                    self.spec = desired.spec.clone();
                }

                fn readiness(&self) -> Readiness {
                    rook_readiness(self.status.as_ref())
                }
            }
        )+
    };
}

rook_convergent!(
    CephClient,
    CephFilesystem,
    CephRBDMirror,
    CephObjectStore,
    CephObjectZoneGroup,
    CephObjectZone,
);

impl Convergent for CephBlockPool {
    fn same_spec(&self, desired: &Self) -> bool {
        self.spec == desired.spec
    }

    fn adopt_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
    }

    fn readiness(&self) -> Readiness {
        rook_readiness(self.status.as_ref())
    }

    /// Builtin pools are owned by the cluster state step and object storage.
    fn preserve(&self) -> bool {
        self.spec
            .name
            .as_deref()
            .is_some_and(|name| BUILTIN_POOLS.contains(&name))
    }
}

impl Convergent for NetworkPolicy {
    fn same_spec(&self, desired: &Self) -> bool {
        self.spec == desired.spec && self.labels() == desired.labels()
    }

    fn adopt_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
        self.metadata.labels = desired.metadata.labels.clone();
    }
}

impl Convergent for Ingress {
    fn same_spec(&self, desired: &Self) -> bool {
        self.spec == desired.spec
            && self.labels() == desired.labels()
            && self.annotations() == desired.annotations()
    }

    fn adopt_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
        self.metadata.labels = desired.metadata.labels.clone();
        self.metadata.annotations = desired.metadata.annotations.clone();
    }
}

impl Convergent for Secret {
    fn same_spec(&self, desired: &Self) -> bool {
        self.data == desired.data && self.type_ == desired.type_ && self.labels() == desired.labels()
    }

    fn adopt_spec(&mut self, desired: &Self) {
        self.data = desired.data.clone();
        self.type_ = desired.type_.clone();
        self.metadata.labels = desired.metadata.labels.clone();
    }
}

/// The single mutating action applied to one child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectProcess {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ObjectProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectProcess::Create => write!(f, "create"),
            ObjectProcess::Update => write!(f, "update"),
            ObjectProcess::Delete => write!(f, "delete"),
        }
    }
}

/// Apply one action to one object.
///
/// Errors are wrapped as `failed to <op> <Kind> <ns>/<name>: <cause>`. Deleting
/// an object that is already gone succeeds.
pub async fn process<K>(
    store: &dyn ObjectStore<K>,
    op: ObjectProcess,
    obj: &K,
    namespace: &str,
) -> std::result::Result<(), String>
where
    K: Resource<DynamicType = ()> + Send + Sync,
{
    let name = obj.meta().name.clone().unwrap_or_default();
    let result = match op {
        ObjectProcess::Create => store.create(obj).await.map(|_| ()),
        ObjectProcess::Update => store.update(obj).await.map(|_| ()),
        ObjectProcess::Delete => match store.delete(&name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        },
    };
    result.map_err(|e| {
        format!(
            "failed to {op} {} {}: {e}",
            K::kind(&()),
            qualified(namespace, &name)
        )
    })
}

fn qualified(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// Which live objects a [`converge`] call owns.
#[derive(Clone, Copy, Debug)]
pub struct DiffScope<'a> {
    /// Plural label used in messages, e.g. `CephClients`.
    pub kinds: &'a str,
    /// Namespace used in messages; empty for cluster-scoped kinds.
    pub namespace: &'a str,
    /// Label selector restricting the live listing.
    pub selector: Option<&'a str>,
}

/// Whether a live object carries the preserve annotation.
pub fn has_preserve_annotation<K: Resource>(obj: &K) -> bool {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(PRESERVE_ANNOTATION))
        .is_some_and(|v| v == "true")
}

/// Message recorded for a live item that cannot be updated yet.
pub fn not_ready_message(kind: &str, namespace: &str, name: &str, readiness: &Readiness) -> String {
    let mut msg = format!(
        "found not ready {kind} {}, waiting for readiness",
        qualified(namespace, name)
    );
    if let Readiness::NotReady { phase: Some(phase) } = readiness {
        msg.push_str(&format!(" (current phase is {phase})"));
    }
    msg
}

/// Collapse the errors of one step into a single message.
pub fn aggregate_errors(kinds: &str, errors: &[String]) -> Option<String> {
    match errors {
        [] => None,
        [single] => Some(format!("failed to ensure {kinds}: {single}")),
        _ => Some(format!(
            "failed to ensure {kinds}, multiple errors during {kinds} ensure"
        )),
    }
}

/// Fold the outcomes of sub-steps into one step outcome.
///
/// A single failure is passed through as is; several collapse into
/// `multiple errors during <what> ensure`.
pub fn combine(what: &str, outcomes: impl IntoIterator<Item = StepOutcome>) -> StepOutcome {
    let mut changed = false;
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(c) => changed |= c,
            Err(e) => errors.push(e),
        }
    }
    match errors.as_slice() {
        [] => Ok(changed),
        [single] => Err(single.clone()),
        _ => Err(format!("multiple errors during {what} ensure")),
    }
}

/// Planned actions of one convergence, computed from names only.
#[derive(Debug)]
pub struct Plan<K> {
    pub create: Vec<K>,
    /// Live objects with the desired spec already adopted.
    pub update: Vec<K>,
    pub delete: Vec<K>,
    /// Messages for live items whose update waits for readiness.
    pub waiting: Vec<String>,
}

/// Split `desired` against `live` into create, update and delete sets.
///
/// Desired annotations are merged into updated objects add-only. Preserved
/// live objects never land in the delete set.
pub fn plan<K>(desired: Vec<K>, live: Vec<K>, namespace: &str) -> Plan<K>
where
    K: Convergent,
{
    let mut live: BTreeMap<String, K> = live.into_iter().map(|o| (o.name_any(), o)).collect();
    let kind = K::kind(&());
    let mut plan = Plan {
        create: Vec::new(),
        update: Vec::new(),
        delete: Vec::new(),
        waiting: Vec::new(),
    };
    let mut desired_names = BTreeSet::new();

    for want in desired {
        let name = want.name_any();
        if !desired_names.insert(name.clone()) {
            continue;
        }
        match live.remove(&name) {
            None => plan.create.push(want),
            Some(current) if current.same_spec(&want) => {
                debug!(kind = %kind, name = %name, "Child resource is up to date");
            }
            Some(current) => {
                let readiness = current.readiness();
                if readiness != Readiness::Ready {
                    plan.waiting
                        .push(not_ready_message(&kind, namespace, &name, &readiness));
                    continue;
                }
                let mut updated = current;
                updated.adopt_spec(&want);
                if let Some(annotations) = want.meta().annotations.as_ref() {
                    let merged = updated.annotations_mut();
                    for (key, value) in annotations {
                        merged.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
                plan.update.push(updated);
            }
        }
    }

    for (name, current) in live {
        if has_preserve_annotation(&current) || current.preserve() {
            debug!(kind = %kind, name = %name, "Keeping preserved child resource");
            continue;
        }
        plan.delete.push(current);
    }
    plan
}

/// Run every action of `plan`. Returns whether anything was attempted and
/// the wrapped errors, waiting messages first.
pub async fn execute<K>(store: &dyn ObjectStore<K>, plan: Plan<K>, namespace: &str) -> (bool, Vec<String>)
where
    K: Convergent,
{
    let kind = K::kind(&());
    let mut applied = 0usize;
    let mut errors = plan.waiting;

    let actions = plan
        .create
        .into_iter()
        .map(|o| (ObjectProcess::Create, o))
        .chain(plan.update.into_iter().map(|o| (ObjectProcess::Update, o)))
        .chain(plan.delete.into_iter().map(|o| (ObjectProcess::Delete, o)));
    for (op, obj) in actions {
        info!(kind = %kind, name = %obj.name_any(), action = %op, "Processing child resource");
        match process(store, op, &obj, namespace).await {
            Ok(()) => applied += 1,
            Err(e) => errors.push(e),
        }
    }
    (applied > 0, errors)
}

/// Converge the live objects in `scope` to exactly `desired`.
pub async fn converge<K>(store: &dyn ObjectStore<K>, scope: &DiffScope<'_>, desired: Vec<K>) -> StepOutcome
where
    K: Convergent,
{
    let live = match store.list(scope.selector).await {
        Ok(items) => items,
        Err(e) => {
            let error = format!("failed to list {}: {e}", scope.kinds);
            return Err(aggregate_errors(scope.kinds, &[error]).unwrap_or_default());
        }
    };
    let (changed, errors) = execute(store, plan(desired, live, scope.namespace), scope.namespace).await;
    match aggregate_errors(scope.kinds, &errors) {
        Some(message) => Err(message),
        None => Ok(changed),
    }
}
