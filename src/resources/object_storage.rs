//! Object storage generation: the gateway, its external Service and the
//! multisite realm, zone group and zone objects.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{
    CephObjectRealm, CephObjectRealmSpec, CephObjectStore, CephObjectStoreSpec, CephObjectZone,
    CephObjectZoneGroup, CephObjectZoneGroupSpec, CephObjectZoneSpec, IngressTlsConfig,
    ObjectStorageSpec, RealmPullSpec, RealmSpec, RgwSpec, RookGatewaySpec, RookZoneRef,
    ZoneGroupSpec, ZoneSpec,
};
use crate::resources::ceph_config::{rgw_config_section, updated_annotation};
use crate::resources::common::{child_meta, rgw_resource_name, rook_pool_spec};
use crate::resources::pools::default_target_size_ratio;

const ACCESS_KEY_LEN: usize = 20;
const SECRET_KEY_LEN: usize = 40;

/// `<realm>-keys`
pub fn realm_secret_name(realm: &str) -> String {
    format!("{realm}-keys")
}

/// `rook-ceph-rgw-<rgw>-external`
pub fn external_service_name(rgw: &str) -> String {
    rgw_resource_name(rgw, Some("external"))
}

/// Public host name of the gateway behind the ingress.
pub fn public_host(rgw: &str, tls: &IngressTlsConfig) -> String {
    format!(
        "{}.{}",
        tls.hostname.as_deref().filter(|h| !h.is_empty()).unwrap_or(rgw),
        tls.public_domain
    )
}

/// Realm reached from the gateway zone through its zone group.
pub fn default_realm_name(object_storage: &ObjectStorageSpec) -> Option<String> {
    let zone_name = &object_storage.rgw.zone.as_ref()?.name;
    let multisite = object_storage.multi_site.as_ref()?;
    let zone = multisite.zones.iter().find(|z| &z.name == zone_name)?;
    let zone_group = multisite
        .zone_groups
        .iter()
        .find(|zg| zg.name == zone.zone_group_name)?;
    multisite
        .realms
        .iter()
        .find(|r| r.name == zone_group.realm_name)
        .map(|r| r.name.clone())
}

/// Fresh access and secret keys for a realm created locally.
pub fn generate_realm_keys() -> (String, String) {
    let mut access = uuid::Uuid::new_v4().simple().to_string();
    access.truncate(ACCESS_KEY_LEN);
    let mut secret = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    secret.truncate(SECRET_KEY_LEN);
    (access, secret)
}

pub fn realm_secret_data(access_key: &str, secret_key: &str) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        ("access-key".to_string(), ByteString(access_key.as_bytes().to_vec())),
        ("secret-key".to_string(), ByteString(secret_key.as_bytes().to_vec())),
    ])
}

pub fn generate_realm_secret(realm: &str, access_key: &str, secret_key: &str, rook_namespace: &str) -> Secret {
    Secret {
        metadata: child_meta(&realm_secret_name(realm), rook_namespace),
        data: Some(realm_secret_data(access_key, secret_key)),
        ..Default::default()
    }
}

pub fn generate_realm(realm: &RealmSpec, default_realm: bool, rook_namespace: &str) -> CephObjectRealm {
    CephObjectRealm {
        metadata: child_meta(&realm.name, rook_namespace),
        spec: CephObjectRealmSpec {
            pull: RealmPullSpec {
                endpoint: realm
                    .pull_endpoint
                    .as_ref()
                    .map(|p| p.endpoint.clone())
                    .unwrap_or_default(),
            },
            default_realm,
        },
        status: None,
    }
}

pub fn generate_zone_group(zone_group: &ZoneGroupSpec, rook_namespace: &str) -> CephObjectZoneGroup {
    CephObjectZoneGroup {
        metadata: child_meta(&zone_group.name, rook_namespace),
        spec: CephObjectZoneGroupSpec {
            realm: zone_group.realm_name.clone(),
        },
        status: None,
    }
}

pub fn generate_zone(
    zone: &ZoneSpec,
    endpoints: Vec<String>,
    preserve_pools_on_delete: bool,
    rook_namespace: &str,
) -> CephObjectZone {
    CephObjectZone {
        metadata: child_meta(&zone.name, rook_namespace),
        spec: CephObjectZoneSpec {
            zone_group: zone.zone_group_name.clone(),
            metadata_pool: rook_pool_spec(&zone.metadata_pool, default_target_size_ratio("rgw metadata")),
            data_pool: rook_pool_spec(&zone.data_pool, default_target_size_ratio("rgw data")),
            custom_endpoints: endpoints,
            preserve_pools_on_delete,
        },
        status: None,
    }
}

/// The CephObjectStore for the gateway.
///
/// A gateway joined to a multisite zone takes its pools from the zone.
/// Gateway pods carry the global and rgw section timestamps.
pub fn generate_object_store(
    rgw: &RgwSpec,
    default_realm: bool,
    timestamps: &BTreeMap<String, String>,
    rook_namespace: &str,
) -> CephObjectStore {
    let section = rgw_config_section(&rgw.name);
    let mut annotations = BTreeMap::new();
    for group in ["global", section.as_str()] {
        annotations.insert(
            updated_annotation(group),
            timestamps.get(group).cloned().unwrap_or_default(),
        );
    }

    let zone = rgw
        .zone
        .as_ref()
        .filter(|z| !z.name.is_empty())
        .map(|z| RookZoneRef {
            name: z.name.clone(),
        });
    let (metadata_pool, data_pool) = if zone.is_some() {
        (None, None)
    } else {
        (
            rgw.metadata_pool
                .as_ref()
                .map(|p| rook_pool_spec(p, default_target_size_ratio("rgw metadata"))),
            rgw.data_pool
                .as_ref()
                .map(|p| rook_pool_spec(p, default_target_size_ratio("rgw data"))),
        )
    };

    CephObjectStore {
        metadata: child_meta(&rgw.name, rook_namespace),
        spec: CephObjectStoreSpec {
            metadata_pool,
            data_pool,
            preserve_pools_on_delete: rgw.preserve_pools_on_delete,
            gateway: RookGatewaySpec {
                port: rgw.gateway.port,
                secure_port: rgw.gateway.secure_port,
                instances: rgw.gateway.instances,
                annotations,
            },
            zone,
            default_realm,
        },
        status: None,
    }
}

/// LoadBalancer Service exposing the gateway outside the cluster.
pub fn generate_external_service(
    rgw: &RgwSpec,
    access_label: Option<(&str, &str)>,
    rook_namespace: &str,
) -> Service {
    let mut labels = BTreeMap::from([
        ("app".to_string(), "rook-ceph-rgw".to_string()),
        ("rook_object_store".to_string(), rgw.name.clone()),
    ]);
    if let Some((key, value)) = access_label {
        labels.insert(key.to_string(), value.to_string());
    }
    let mut meta = child_meta(&external_service_name(&rgw.name), rook_namespace);
    meta.labels = Some(labels);

    let port = |name: &str, port: i32, target: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::Int(target)),
        ..Default::default()
    };
    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            session_affinity: Some("None".to_string()),
            ports: Some(vec![
                port("http", 80, rgw.gateway.port),
                port("https", 443, rgw.gateway.secure_port),
            ]),
            selector: Some(BTreeMap::from([
                ("app".to_string(), "rook-ceph-rgw".to_string()),
                ("rook_cluster".to_string(), rook_namespace.to_string()),
                ("rook_object_store".to_string(), rgw.name.clone()),
            ])),
            ..Default::default()
        }),
        status: None,
    }
}
