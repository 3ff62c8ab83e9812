//! Multisite convergence and teardown: realms, zone groups and zones.

use ceph_deployment_operator::controller::context::UpdateTimestamps;
use ceph_deployment_operator::controller::multisite::{delete_multisite, ensure_multisite, realm_keys};
use ceph_deployment_operator::controller::object_storage::delete_object_storage;
use ceph_deployment_operator::controller::pass::PassContext;
use ceph_deployment_operator::crd::{
    CephDeployment, CephObjectRealm, CephObjectRealmSpec, CephObjectStore, CephObjectStoreSpec,
    CephObjectZone, CephObjectZoneGroup, CephObjectZoneGroupSpec, CephObjectZoneSpec, IngressConfig,
    IngressTlsConfig, MultiSiteSpec, ObjectStorageSpec, PullEndpoint, RealmSpec, RgwSpec, RookZoneRef,
    ZoneGroupSpec, ZoneRef, ZoneSpec,
};
use ceph_deployment_operator::resources::object_storage::{
    external_service_name, generate_realm_secret, realm_secret_name,
};
use ceph_deployment_operator::store::memory::{ANY_NAME, MemoryStores, StoreOp};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service, ServiceStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::common::fixtures::{CephDeploymentBuilder, NAMESPACE, ROOK_NAMESPACE, mon_node, test_config};

const RGW: &str = "rgw-store";

fn realm(name: &str) -> CephObjectRealm {
    CephObjectRealm::new(name, CephObjectRealmSpec::default())
}

fn zone_group(name: &str, realm: &str) -> CephObjectZoneGroup {
    CephObjectZoneGroup::new(
        name,
        CephObjectZoneGroupSpec {
            realm: realm.to_string(),
        },
    )
}

fn zone(name: &str, zone_group: &str) -> CephObjectZone {
    CephObjectZone::new(
        name,
        CephObjectZoneSpec {
            zone_group: zone_group.to_string(),
            ..Default::default()
        },
    )
}

fn script_radosgw(memory: &MemoryStores) {
    let cli = &memory.cli;
    cli.respond("radosgw-admin zonegroup list", r#"{"default_info": "", "zonegroups": ["zg1"]}"#);
    cli.respond("radosgw-admin zonegroup delete --rgw-zonegroup=zg1", "");
    cli.respond("radosgw-admin realm list", r#"{"default_info": "", "realms": ["r1"]}"#);
    cli.respond("radosgw-admin realm rm --rgw-realm=r1", "");
}

#[tokio::test]
async fn test_realm_in_use_is_kept() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.realms.seed(realm("r1"));
    memory
        .secrets
        .seed(generate_realm_secret("r1", "access", "secret", ROOK_NAMESPACE));
    memory.zone_groups.seed(zone_group("zg1", "r1"));
    script_radosgw(&memory);
    let stores = memory.stores();

    // The zone group goes first; the realm it named waits for the next pass.
    assert_eq!(delete_multisite(&stores, ROOK_NAMESPACE).await, Ok(false));
    assert!(memory.zone_groups.is_empty());
    assert_eq!(memory.realms.names(), vec!["r1"]);
    assert!(!memory.secrets.is_empty());

    assert_eq!(delete_multisite(&stores, ROOK_NAMESPACE).await, Ok(false));
    assert!(memory.realms.is_empty());
    assert!(memory.secrets.is_empty());

    assert_eq!(delete_multisite(&stores, ROOK_NAMESPACE).await, Ok(true));
}

#[tokio::test]
async fn test_full_multisite_teardown() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.realms.seed(realm("r1"));
    memory.zone_groups.seed(zone_group("zg1", "r1"));
    memory.zones.seed(zone("z1", "zg1"));
    memory.object_stores.seed(CephObjectStore::new(
        "rgw",
        CephObjectStoreSpec {
            zone: Some(RookZoneRef {
                name: "z1".to_string(),
            }),
            ..Default::default()
        },
    ));
    script_radosgw(&memory);
    let stores = memory.stores();

    let mut passes = 0;
    loop {
        passes += 1;
        assert!(passes <= 8, "object storage teardown did not finish");
        if delete_object_storage(&stores, ROOK_NAMESPACE, false).await.unwrap() {
            break;
        }
    }

    // gateway, zone, zone group, realm, then the final check
    assert_eq!(passes, 5);
    assert!(memory.object_stores.is_empty());
    assert!(memory.zones.is_empty());
    assert!(memory.zone_groups.is_empty());
    assert!(memory.realms.is_empty());

    let commands = memory.cli.commands();
    let position = |cmd: &str| commands.iter().position(|c| c == cmd).unwrap();
    assert!(
        position("radosgw-admin zonegroup delete --rgw-zonegroup=zg1")
            < position("radosgw-admin realm rm --rgw-realm=r1")
    );
}

#[tokio::test]
async fn test_radosgw_failure_keeps_zone_group() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.zone_groups.seed(zone_group("zg1", "r1"));
    memory.cli.fail("radosgw-admin zonegroup list", "toolbox not ready");
    let stores = memory.stores();

    let err = delete_multisite(&stores, ROOK_NAMESPACE).await.unwrap_err();
    assert!(err.starts_with("failed to cleanup multisite: failed to check zonegroup list"), "{err}");
    assert_eq!(memory.zone_groups.names(), vec!["zg1"]);
}

#[tokio::test]
async fn test_failed_realm_removal_keeps_keys() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.realms.seed(realm("r1"));
    memory
        .secrets
        .seed(generate_realm_secret("r1", "access", "secret", ROOK_NAMESPACE));
    memory
        .cli
        .respond("radosgw-admin realm list", r#"{"default_info": "", "realms": ["r1"]}"#);
    memory.cli.fail("radosgw-admin realm rm --rgw-realm=r1", "rgw busy");
    let stores = memory.stores();

    let err = delete_multisite(&stores, ROOK_NAMESPACE).await.unwrap_err();
    assert!(err.contains("failed to remove realm 'r1': "), "{err}");
    assert_eq!(memory.realms.names(), vec!["r1"]);
    assert_eq!(memory.secrets.names(), vec!["r1-keys"]);
}

#[tokio::test]
async fn test_realm_keys_removed_after_realm() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.realms.seed(realm("r1"));
    memory
        .secrets
        .seed(generate_realm_secret("r1", "access", "secret", ROOK_NAMESPACE));
    memory.secrets.fail_on(StoreOp::Delete, "r1-keys", "secret is locked");
    script_radosgw(&memory);
    let stores = memory.stores();

    let err = delete_multisite(&stores, ROOK_NAMESPACE).await.unwrap_err();
    assert!(err.contains("failed to delete Secret 'rook-ceph/r1-keys'"), "{err}");
    assert!(memory.realms.is_empty());
    assert_eq!(memory.secrets.names(), vec!["r1-keys"]);
}

fn rgw_zone_store(name: &str, zone: Option<&str>) -> CephObjectStore {
    CephObjectStore::new(
        name,
        CephObjectStoreSpec {
            zone: zone.map(|z| RookZoneRef { name: z.to_string() }),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_unnamed_store_zone_uses_store_name() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.zones.seed(zone("z1", "zg1"));
    memory.object_stores.seed(rgw_zone_store("z1", None));
    memory.object_stores.seed(rgw_zone_store("z2", Some("")));
    memory.zones.seed(zone("z2", "zg1"));
    let stores = memory.stores();

    assert_eq!(delete_multisite(&stores, ROOK_NAMESPACE).await, Ok(false));
    assert_eq!(memory.zones.names(), vec!["z1", "z2"]);

    // The ensure path honours the same reference.
    let dpl = multisite_deployment(MultiSiteSpec::default(), None);
    let config = test_config();
    let timestamps = UpdateTimestamps::default();
    let pass = PassContext::new(&dpl, Vec::new(), &config, &timestamps, &stores);
    assert_eq!(ensure_multisite(&pass).await, Ok(false));
    assert_eq!(memory.zones.names(), vec!["z1", "z2"]);
}

fn multisite_spec(zone_endpoints: Vec<String>) -> MultiSiteSpec {
    MultiSiteSpec {
        realms: vec![RealmSpec {
            name: "realm1".to_string(),
            pull_endpoint: None,
        }],
        zone_groups: vec![ZoneGroupSpec {
            name: "zonegroup1".to_string(),
            realm_name: "realm1".to_string(),
        }],
        zones: vec![ZoneSpec {
            name: "zone1".to_string(),
            zone_group_name: "zonegroup1".to_string(),
            endpoints_for_zone: zone_endpoints,
            ..Default::default()
        }],
    }
}

fn multisite_deployment(multisite: MultiSiteSpec, tls: Option<IngressTlsConfig>) -> CephDeployment {
    let mut dpl = CephDeploymentBuilder::new("cephcluster")
        .node(mon_node("node-a"))
        .object_storage(ObjectStorageSpec {
            rgw: RgwSpec {
                name: RGW.to_string(),
                zone: Some(ZoneRef {
                    name: "zone1".to_string(),
                }),
                ..Default::default()
            },
            multi_site: Some(multisite),
        })
        .build();
    dpl.spec.ingress_config = tls.map(|tls| IngressConfig {
        tls_config: Some(tls),
        ..Default::default()
    });
    dpl
}

/// Run one multisite convergence against `memory`.
async fn converge(memory: &MemoryStores, dpl: &CephDeployment) -> Result<bool, String> {
    let stores = memory.stores();
    let config = test_config();
    let timestamps = UpdateTimestamps::default();
    let pass = PassContext::new(dpl, dpl.spec.nodes.clone(), &config, &timestamps, &stores);
    ensure_multisite(&pass).await
}

fn external_service(ip: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(external_service_name(RGW)),
            namespace: Some(ROOK_NAMESPACE.to_string()),
            ..Default::default()
        },
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn zone_endpoints(memory: &MemoryStores) -> Vec<String> {
    memory.zones.snapshot("zone1").unwrap().spec.custom_endpoints
}

#[tokio::test]
async fn test_ensure_creates_realm_zone_group_and_zone() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    let dpl = multisite_deployment(multisite_spec(Vec::new()), None);

    assert_eq!(converge(&memory, &dpl).await, Ok(true));
    assert_eq!(memory.secrets.names(), vec![realm_secret_name("realm1")]);
    assert_eq!(memory.realms.names(), vec!["realm1"]);
    assert!(memory.realms.snapshot("realm1").unwrap().spec.default_realm);
    assert_eq!(memory.zone_groups.snapshot("zonegroup1").unwrap().spec.realm, "realm1");
    assert_eq!(memory.zones.snapshot("zone1").unwrap().spec.zone_group, "zonegroup1");
    assert!(memory.cli.commands().is_empty());
}

#[tokio::test]
async fn test_failed_realm_still_converges_later_stages() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.realms.fail_on(StoreOp::Create, ANY_NAME, "admission denied");
    let dpl = multisite_deployment(multisite_spec(Vec::new()), None);

    let err = converge(&memory, &dpl).await.unwrap_err();
    assert!(err.contains("failed to ensure realms: "), "{err}");
    assert!(memory.realms.is_empty());
    assert_eq!(memory.zone_groups.names(), vec!["zonegroup1"]);
    assert_eq!(memory.zones.names(), vec!["zone1"]);

    memory.realms.clear_failures();
    assert_eq!(converge(&memory, &dpl).await, Ok(true));
    assert_eq!(memory.realms.names(), vec!["realm1"]);
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.services.seed(external_service("10.0.0.5"));
    let dpl = multisite_deployment(multisite_spec(Vec::new()), None);
    assert_eq!(converge(&memory, &dpl).await, Ok(true));
    let keys = realm_keys(&memory.secrets.snapshot("realm1-keys").unwrap());

    memory.secrets.clear_calls();
    memory.realms.clear_calls();
    memory.zone_groups.clear_calls();
    memory.zones.clear_calls();
    assert_eq!(converge(&memory, &dpl).await, Ok(false));
    assert!(memory.secrets.writes().is_empty());
    assert!(memory.realms.writes().is_empty());
    assert!(memory.zone_groups.writes().is_empty());
    assert!(memory.zones.writes().is_empty());
    // Generated keys of a local realm are never rotated.
    assert_eq!(realm_keys(&memory.secrets.snapshot("realm1-keys").unwrap()), keys);
}

#[tokio::test]
async fn test_pulled_realm_keys_follow_deployment() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    let mut multisite = multisite_spec(Vec::new());
    multisite.realms[0].pull_endpoint = Some(PullEndpoint {
        endpoint: "http://10.1.0.10:80".to_string(),
        access_key: "access1".to_string(),
        secret_key: "secret1".to_string(),
    });
    let dpl = multisite_deployment(multisite.clone(), None);
    assert_eq!(converge(&memory, &dpl).await, Ok(true));
    let secret = memory.secrets.snapshot("realm1-keys").unwrap();
    assert_eq!(realm_keys(&secret), Some(("access1".to_string(), "secret1".to_string())));
    assert_eq!(memory.realms.snapshot("realm1").unwrap().spec.pull.endpoint, "http://10.1.0.10:80");

    let pull = multisite.realms[0].pull_endpoint.as_mut().unwrap();
    pull.access_key = "access2".to_string();
    pull.secret_key = "secret2".to_string();
    let dpl = multisite_deployment(multisite, None);
    assert_eq!(converge(&memory, &dpl).await, Ok(true));
    let secret = memory.secrets.snapshot("realm1-keys").unwrap();
    assert_eq!(realm_keys(&secret), Some(("access2".to_string(), "secret2".to_string())));
}

#[tokio::test]
async fn test_zone_endpoint_precedence() {
    let tls = IngressTlsConfig {
        public_domain: "example.com".to_string(),
        hostname: None,
        tls_secret_ref_name: None,
    };

    // Explicit endpoints beat both the ingress and the service.
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.services.seed(external_service("10.0.0.5"));
    let explicit = vec!["https://zone1.example.org".to_string()];
    let dpl = multisite_deployment(multisite_spec(explicit.clone()), Some(tls.clone()));
    converge(&memory, &dpl).await.unwrap();
    assert_eq!(zone_endpoints(&memory), explicit);

    // The ingress host beats the service address.
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.services.seed(external_service("10.0.0.5"));
    let dpl = multisite_deployment(multisite_spec(Vec::new()), Some(tls));
    converge(&memory, &dpl).await.unwrap();
    assert_eq!(zone_endpoints(&memory), vec!["https://rgw-store.example.com"]);

    // The service address is served on the plain http port.
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.services.seed(external_service("10.0.0.5"));
    let dpl = multisite_deployment(multisite_spec(Vec::new()), None);
    converge(&memory, &dpl).await.unwrap();
    assert_eq!(zone_endpoints(&memory), vec!["http://10.0.0.5:80"]);

    // No address yet leaves the zone without endpoints.
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    converge(&memory, &dpl).await.unwrap();
    assert!(zone_endpoints(&memory).is_empty());
}

#[tokio::test]
async fn test_dropped_realm_in_use_is_kept() {
    let memory = MemoryStores::new(NAMESPACE, ROOK_NAMESPACE);
    memory.realms.seed(realm("realm1"));
    memory
        .secrets
        .seed(generate_realm_secret("realm1", "access", "secret", ROOK_NAMESPACE));
    memory.zone_groups.seed(zone_group("zonegroup1", "realm1"));
    let mut multisite = multisite_spec(Vec::new());
    multisite.realms.clear();
    multisite.zones.clear();
    let dpl = multisite_deployment(multisite, None);

    assert!(converge(&memory, &dpl).await.is_ok());
    assert_eq!(memory.realms.names(), vec!["realm1"]);
    assert_eq!(memory.zone_groups.names(), vec!["zonegroup1"]);
    assert_eq!(memory.secrets.names(), vec!["realm1-keys"]);
    assert!(memory.cli.commands().is_empty());
}
