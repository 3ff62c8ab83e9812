//! Convergence of one child kind through the in-memory store.

use ceph_deployment_operator::controller::differ::{DiffScope, PRESERVE_ANNOTATION, converge, execute, plan};
use ceph_deployment_operator::crd::{CephClient, CephClientResourceSpec, RookStatus};
use ceph_deployment_operator::store::memory::{MemoryStore, StoreOp};
use kube::ResourceExt;

use crate::common::fixtures::ROOK_NAMESPACE;

const SCOPE: DiffScope<'static> = DiffScope {
    kinds: "CephClients",
    namespace: ROOK_NAMESPACE,
    selector: None,
};

fn client(name: &str, caps: &str) -> CephClient {
    let mut obj = CephClient::new(
        name,
        CephClientResourceSpec {
            caps: [("osd".to_string(), caps.to_string())].into(),
        },
    );
    obj.metadata.namespace = Some(ROOK_NAMESPACE.to_string());
    obj
}

fn ready(mut obj: CephClient) -> CephClient {
    obj.status = Some(RookStatus {
        phase: Some("Ready".to_string()),
        message: None,
    });
    obj
}

fn ops(store: &MemoryStore<CephClient>) -> Vec<(StoreOp, String)> {
    store.writes().into_iter().map(|c| (c.op, c.name)).collect()
}

#[tokio::test]
async fn test_client_convergence_example() {
    let store = MemoryStore::new(Some(ROOK_NAMESPACE));
    store.seed(ready(client("cinder", "profile rbd pool=old")));
    store.seed(ready(client("legacy", "profile rbd")));
    store.clear_calls();

    let desired = vec![
        client("cinder", "profile rbd pool=volumes"),
        client("glance", "profile rbd pool=images"),
    ];
    assert_eq!(converge(&store, &SCOPE, desired).await, Ok(true));

    assert_eq!(store.names(), vec!["cinder", "glance"]);
    assert_eq!(store.snapshot("cinder").unwrap().spec.caps["osd"], "profile rbd pool=volumes");
    assert_eq!(
        ops(&store),
        vec![
            (StoreOp::Create, "glance".to_string()),
            (StoreOp::Update, "cinder".to_string()),
            (StoreOp::Delete, "legacy".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_second_pass_is_noop() {
    let store = MemoryStore::new(Some(ROOK_NAMESPACE));
    let desired = || vec![client("cinder", "profile rbd"), client("glance", "profile rbd")];

    assert_eq!(converge(&store, &SCOPE, desired()).await, Ok(true));
    store.clear_calls();

    assert_eq!(converge(&store, &SCOPE, desired()).await, Ok(false));
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_update_keeps_live_annotations() {
    let store = MemoryStore::new(Some(ROOK_NAMESPACE));
    let mut live = ready(client("cinder", "profile rbd"));
    live.annotations_mut()
        .insert("owner".to_string(), "someone-else".to_string());
    store.seed(live);

    let mut want = client("cinder", "profile rbd pool=volumes");
    want.annotations_mut()
        .insert("owner".to_string(), "operator".to_string());
    want.annotations_mut()
        .insert("team".to_string(), "storage".to_string());
    assert_eq!(converge(&store, &SCOPE, vec![want]).await, Ok(true));

    let stored = store.snapshot("cinder").unwrap();
    assert_eq!(stored.annotations()["owner"], "someone-else");
    assert_eq!(stored.annotations()["team"], "storage");
}

#[tokio::test]
async fn test_errors_are_collapsed_but_work_continues() {
    let store = MemoryStore::new(Some(ROOK_NAMESPACE));
    store.seed(client("legacy", "profile rbd"));
    store.fail_on(StoreOp::Create, "cinder", "quota exceeded");
    store.fail_on(StoreOp::Create, "glance", "quota exceeded");

    let desired = vec![
        client("cinder", "profile rbd"),
        client("glance", "profile rbd"),
        client("nova", "profile rbd"),
    ];
    let err = converge(&store, &SCOPE, desired).await.unwrap_err();
    assert_eq!(
        err,
        "failed to ensure CephClients, multiple errors during CephClients ensure"
    );
    // The healthy create and the stale delete still happened.
    assert_eq!(store.names(), vec!["nova"]);
}

#[tokio::test]
async fn test_preserved_item_survives_empty_desired() {
    let store = MemoryStore::new(Some(ROOK_NAMESPACE));
    let mut kept = client("kept", "profile rbd");
    kept.annotations_mut()
        .insert(PRESERVE_ANNOTATION.to_string(), "true".to_string());
    store.seed(kept);
    store.seed(client("dropped", "profile rbd"));

    assert_eq!(converge(&store, &SCOPE, Vec::new()).await, Ok(true));
    assert_eq!(store.names(), vec!["kept"]);
}

#[tokio::test]
async fn test_failed_operations_are_not_changes() {
    let store = MemoryStore::new(Some(ROOK_NAMESPACE));
    store.fail_on(StoreOp::Create, "glance", "quota exceeded");
    let desired = vec![client("glance", "profile rbd pool=images")];

    let planned = plan(desired, Vec::new(), ROOK_NAMESPACE);
    let (changed, errors) = execute(&store, planned, ROOK_NAMESPACE).await;
    assert!(!changed);
    assert_eq!(errors.len(), 1);
    assert!(store.is_empty());

    // One success is enough to report a change.
    let desired = vec![
        client("cinder", "profile rbd pool=volumes"),
        client("glance", "profile rbd pool=images"),
    ];
    let planned = plan(desired, Vec::new(), ROOK_NAMESPACE);
    let (changed, errors) = execute(&store, planned, ROOK_NAMESPACE).await;
    assert!(changed);
    assert_eq!(errors.len(), 1);
    assert_eq!(store.names(), vec!["cinder"]);
}
