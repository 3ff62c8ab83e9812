//! The OpenStack shared secret against in-memory Rook state.

use std::collections::BTreeMap;

use ceph_deployment_operator::controller::context::UpdateTimestamps;
use ceph_deployment_operator::controller::openstack::ensure_openstack_secret;
use ceph_deployment_operator::controller::pass::PassContext;
use ceph_deployment_operator::crd::{
    CephBlockPool, CephBlockPoolSpec, CephClient, CephClientResourceSpec, CephDeployment, ExtraOpts,
    RookStatus,
};
use ceph_deployment_operator::resources::common::MON_ENDPOINTS_NAME;
use ceph_deployment_operator::resources::openstack::{ADMIN_SECRET_NAME, OPENSTACK_SECRET_NAME};
use ceph_deployment_operator::store::memory::{MemoryStores, StoreOp};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::common::fixtures::{
    CephDeploymentBuilder, NAMESPACE, ROOK_NAMESPACE, mon_node, replicated_pool, test_config,
};

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn openstack_deployment() -> CephDeployment {
    CephDeploymentBuilder::new("cephcluster")
        .node(mon_node("node-a"))
        .pool(replicated_pool("kubernetes", true))
        .pool(replicated_pool("images", false))
        .pool(replicated_pool("volumes", false))
        .build()
}

fn ready_pool(name: &str) -> CephBlockPool {
    let mut pool = CephBlockPool::new(name, CephBlockPoolSpec::default());
    pool.status = Some(RookStatus {
        phase: Some("Ready".to_string()),
        message: None,
    });
    pool
}

/// Ready pools, the three OpenStack clients and their keys, monitors and the admin secret.
fn seeded() -> MemoryStores {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.block_pools.seed(ready_pool("images-hdd"));
    memory.block_pools.seed(ready_pool("volumes-hdd"));
    for client in ["cinder", "glance", "nova"] {
        memory
            .clients
            .seed(CephClient::new(client, CephClientResourceSpec::default()));
        memory
            .cli
            .respond(&format!("ceph auth get-key client.{client}"), &format!("{client}-key\n"));
    }
    memory.config_maps.seed(ConfigMap {
        metadata: meta(MON_ENDPOINTS_NAME),
        data: Some(BTreeMap::from([(
            "data".to_string(),
            "a=10.0.0.1:6789,b=10.0.0.2:6789".to_string(),
        )])),
        ..Default::default()
    });
    memory.secrets.seed(Secret {
        metadata: meta(ADMIN_SECRET_NAME),
        data: Some(BTreeMap::from([(
            "ceph-secret".to_string(),
            ByteString(b"admin-key".to_vec()),
        )])),
        ..Default::default()
    });
    memory
}

async fn converge(memory: &MemoryStores, dpl: &CephDeployment) -> Result<bool, String> {
    let stores = memory.stores();
    let config = test_config();
    let timestamps = UpdateTimestamps::default();
    let pass = PassContext::new(dpl, dpl.spec.nodes.clone(), &config, &timestamps, &stores);
    ensure_openstack_secret(&pass).await
}

fn value(memory: &MemoryStores, key: &str) -> String {
    let secret = memory.shared_secrets.snapshot(OPENSTACK_SECRET_NAME).unwrap();
    String::from_utf8(secret.data.unwrap()[key].0.clone()).unwrap()
}

#[tokio::test]
async fn test_secret_created_then_settles() {
    let memory = seeded();
    let dpl = openstack_deployment();

    assert_eq!(converge(&memory, &dpl).await, Ok(true));
    let secret = memory.shared_secrets.snapshot(OPENSTACK_SECRET_NAME).unwrap();
    assert_eq!(secret.metadata.namespace.as_deref(), Some("openstack-ceph-shared"));
    assert_eq!(value(&memory, "glance"), "client.glance;glance-key\n;images-hdd:images:hdd");
    assert_eq!(
        value(&memory, "cinder"),
        "client.cinder;cinder-key\n;images-hdd:images:hdd;volumes-hdd:volumes:hdd"
    );
    assert_eq!(value(&memory, "client.admin"), "admin-key");
    assert_eq!(value(&memory, "mon_endpoints"), "10.0.0.1:6789,10.0.0.2:6789");

    memory.shared_secrets.clear_calls();
    assert_eq!(converge(&memory, &dpl).await, Ok(false));
    assert!(memory.shared_secrets.writes().is_empty());

    // A rotated key rewrites the secret.
    memory.cli.respond("ceph auth get-key client.nova", "rotated\n");
    assert_eq!(converge(&memory, &dpl).await, Ok(true));
    assert!(value(&memory, "nova").starts_with("client.nova;rotated\n"));
}

#[tokio::test]
async fn test_waits_for_openstack_pools() {
    let memory = seeded();
    memory.block_pools.seed(CephBlockPool::new("volumes-hdd", CephBlockPoolSpec::default()));

    let err = converge(&memory, &openstack_deployment()).await.unwrap_err();
    assert_eq!(
        err,
        "skip openstack secret ensure since the following required OpenStack pools are not ready yet: [volumes-hdd]"
    );
    assert!(memory.shared_secrets.is_empty());
}

#[tokio::test]
async fn test_requires_openstack_clients() {
    let memory = seeded();
    memory.clients.fail_on(StoreOp::Get, "nova", "forbidden");

    let err = converge(&memory, &openstack_deployment()).await.unwrap_err();
    assert!(err.starts_with("skip openstack secret ensure: no required ceph clients"), "{err}");
    assert!(memory.shared_secrets.is_empty());
}

#[tokio::test]
async fn test_failed_key_lookup_is_reported() {
    let memory = seeded();
    memory.cli.fail("ceph auth get-key client.glance", "timed out");

    let err = converge(&memory, &openstack_deployment()).await.unwrap_err();
    assert_eq!(
        err,
        "failed to get auth keys for ceph clients: some auth keys failed to get: failed to run 'ceph auth get-key client.glance' command"
    );
}

#[tokio::test]
async fn test_skipped_without_openstack_pools_or_when_disabled() {
    let memory = seeded();
    let plain = CephDeploymentBuilder::new("cephcluster")
        .node(mon_node("node-a"))
        .pool(replicated_pool("kubernetes", true))
        .build();
    assert_eq!(converge(&memory, &plain).await, Ok(false));

    let mut disabled = openstack_deployment();
    disabled.spec.extra_opts = Some(ExtraOpts {
        disable_os_keys: true,
        ..Default::default()
    });
    assert_eq!(converge(&memory, &disabled).await, Ok(false));
    assert!(memory.shared_secrets.is_empty());
}
