//! Multisite object graph: realms, then zone groups, then zones.
//!
//! Each level is converged against the live objects, but an undesired object
//! is only removed once nothing on the level below references it:
//! - a realm is kept while a zone group names it
//! - a zone group is kept while a zone names it
//! - a zone is kept while an object store names it
//!
//! Removal of zone groups and realms also drops them from the running Ceph
//! cluster through `radosgw-admin`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::controller::differ::{StepOutcome, combine, execute, plan};
use crate::controller::pass::PassContext;
use crate::crd::{CephObjectRealm, CephObjectStore, MultiSiteSpec, RealmSpec, ZoneSpec};
use crate::resources::object_storage::{
    default_realm_name, external_service_name, generate_realm, generate_realm_keys,
    generate_realm_secret, generate_zone, generate_zone_group, public_host, realm_secret_data,
    realm_secret_name,
};
use crate::store::Stores;
use crate::store::exec::run_json;

type Outcome = std::result::Result<bool, String>;

/// Names of referencing objects, keyed by the referenced name.
type InUse = BTreeMap<String, Vec<String>>;

fn in_use<T>(items: &[T], reference: impl Fn(&T) -> Option<String>) -> InUse
where
    T: ResourceExt,
{
    let mut refs = InUse::new();
    for item in items {
        if let Some(target) = reference(item).filter(|t| !t.is_empty()) {
            refs.entry(target).or_default().push(item.name_any());
        }
    }
    refs
}

/// Zone an object store serves; an unnamed zone takes the store's name.
fn store_zone(store: &CephObjectStore) -> String {
    store
        .spec
        .zone
        .as_ref()
        .map(|z| z.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| store.name_any())
}

fn join_errors(errors: Vec<String>) -> Outcome {
    if errors.is_empty() {
        Ok(true)
    } else {
        Err(errors.join(", "))
    }
}

#[derive(Debug, Deserialize)]
struct ZoneGroupList {
    #[serde(default)]
    zonegroups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RealmList {
    #[serde(default)]
    realms: Vec<String>,
}

async fn delete_zone(stores: &Stores, rook_namespace: &str, zone: &str) -> Result<(), String> {
    info!(namespace = %rook_namespace, zone = %zone, "Removing CephObjectZone");
    match stores.zones.delete(zone).await {
        Err(e) if !e.is_not_found() => Err(format!(
            "failed to delete CephObjectZone '{rook_namespace}/{zone}': {e}"
        )),
        _ => Ok(()),
    }
}

async fn delete_zone_group(stores: &Stores, rook_namespace: &str, zone_group: &str) -> Result<(), String> {
    info!(namespace = %rook_namespace, zone_group = %zone_group, "Removing CephObjectZoneGroup");
    let cli = stores.cli.as_ref();
    let present: ZoneGroupList = run_json(cli, "radosgw-admin zonegroup list")
        .await
        .map_err(|e| format!("failed to check zonegroup list: {e}"))?;
    if present.zonegroups.iter().any(|zg| zg == zone_group) {
        cli.run(&format!("radosgw-admin zonegroup delete --rgw-zonegroup={zone_group}"))
            .await
            .map_err(|e| format!("failed to remove zonegroup '{zone_group}': {e}"))?;
    }
    match stores.zone_groups.delete(zone_group).await {
        Err(e) if !e.is_not_found() => Err(format!(
            "failed to delete CephObjectZoneGroup '{rook_namespace}/{zone_group}': {e}"
        )),
        _ => Ok(()),
    }
}

async fn delete_realm(stores: &Stores, rook_namespace: &str, realm: &str) -> Result<(), String> {
    info!(namespace = %rook_namespace, realm = %realm, "Removing CephObjectRealm");
    let cli = stores.cli.as_ref();
    let present: RealmList = run_json(cli, "radosgw-admin realm list")
        .await
        .map_err(|e| format!("failed to check realm list: {e}"))?;
    if present.realms.iter().any(|r| r == realm) {
        cli.run(&format!("radosgw-admin realm rm --rgw-realm={realm}"))
            .await
            .map_err(|e| format!("failed to remove realm '{realm}': {e}"))?;
    }
    if let Err(e) = stores.realms.delete(realm).await
        && !e.is_not_found()
    {
        return Err(format!("failed to delete CephObjectRealm '{rook_namespace}/{realm}': {e}"));
    }

    // Keys go last: a realm that is still around must stay reachable.
    let secret = realm_secret_name(realm);
    info!(namespace = %rook_namespace, realm = %realm, secret = %secret, "Removing CephObjectRealm keys");
    match stores.secrets.delete(&secret).await {
        Err(e) if !e.is_not_found() => Err(format!(
            "failed to delete Secret '{rook_namespace}/{secret}' for CephObjectRealm '{rook_namespace}/{realm}': {e}"
        )),
        _ => Ok(()),
    }
}

/// Make sure the realm keys Secret exists.
///
/// Keys of a pulled realm follow the spec; keys of a local realm are
/// generated once and never touched again.
async fn sync_realm_secret(pass: &PassContext<'_>, realm: &RealmSpec) -> Outcome {
    let rook_ns = pass.rook_namespace();
    let store = pass.stores.secrets.as_ref();
    let name = realm_secret_name(&realm.name);
    let live = store
        .get(&name)
        .await
        .map_err(|e| format!("failed to get secret '{rook_ns}/{name}' for CephObjectRealm '{}': {e}", realm.name))?;

    match (live, realm.pull_endpoint.as_ref()) {
        (None, pull) => {
            let (access, secret) = match pull {
                Some(pull) => (pull.access_key.clone(), pull.secret_key.clone()),
                None => generate_realm_keys(),
            };
            info!(namespace = %rook_ns, secret = %name, "Creating CephObjectRealm keys");
            store
                .create(&generate_realm_secret(&realm.name, &access, &secret, rook_ns))
                .await
                .map_err(|e| format!("failed to create Secret '{rook_ns}/{name}': {e}"))?;
            Ok(true)
        }
        (Some(mut current), Some(pull)) => {
            let data = realm_secret_data(&pull.access_key, &pull.secret_key);
            if current.data.as_ref() == Some(&data) {
                return Ok(false);
            }
            info!(namespace = %rook_ns, secret = %name, "Updating CephObjectRealm keys");
            current.data = Some(data);
            store
                .update(&current)
                .await
                .map_err(|e| format!("failed to update Secret '{rook_ns}/{name}': {e}"))?;
            Ok(true)
        }
        (Some(_), None) => Ok(false),
    }
}

fn realm_needs_update(current: &CephObjectRealm, desired: &CephObjectRealm) -> bool {
    current.spec.pull.endpoint != desired.spec.pull.endpoint
        || (desired.spec.default_realm && !current.spec.default_realm)
}

async fn ensure_realms(pass: &PassContext<'_>, multisite: &MultiSiteSpec, default_realm: Option<&str>) -> Outcome {
    let rook_ns = pass.rook_namespace();
    let stores = pass.stores;
    let live = stores
        .realms
        .list(None)
        .await
        .map_err(|e| format!("failed to get list CephObjectRealms in '{rook_ns}' namespace: {e}"))?;
    let zone_groups = stores
        .zone_groups
        .list(None)
        .await
        .map_err(|e| format!("failed to get list CephObjectZoneGroups in '{rook_ns}' namespace: {e}"))?;
    let realms_in_use = in_use(&zone_groups, |zg| Some(zg.spec.realm.clone()));

    let mut live: BTreeMap<String, CephObjectRealm> = live.into_iter().map(|r| (r.name_any(), r)).collect();
    let mut changed = false;
    let mut errors = Vec::new();

    for realm in &multisite.realms {
        match sync_realm_secret(pass, realm).await {
            Ok(updated) => changed |= updated,
            Err(e) => {
                error!(realm = %realm.name, error = %e, "Failed to ensure CephObjectRealm keys");
                errors.push(e);
                live.remove(&realm.name);
                continue;
            }
        }
        let desired = generate_realm(realm, default_realm == Some(realm.name.as_str()), rook_ns);
        let result = match live.remove(&realm.name) {
            None => {
                info!(namespace = %rook_ns, realm = %realm.name, "Creating CephObjectRealm");
                changed = true;
                stores.realms.create(&desired).await.map(|_| ()).map_err(|e| {
                    format!("failed to create CephObjectRealm '{rook_ns}/{}': {e}", realm.name)
                })
            }
            Some(mut current) if realm_needs_update(&current, &desired) => {
                info!(namespace = %rook_ns, realm = %realm.name, "Updating CephObjectRealm");
                changed = true;
                current.spec.pull.endpoint = desired.spec.pull.endpoint;
                current.spec.default_realm |= desired.spec.default_realm;
                stores.realms.update(&current).await.map(|_| ()).map_err(|e| {
                    format!("failed to update CephObjectRealm '{rook_ns}/{}': {e}", realm.name)
                })
            }
            Some(_) => Ok(()),
        };
        if let Err(e) = result {
            error!(realm = %realm.name, error = %e, "Failed to ensure CephObjectRealm");
            errors.push(e);
        }
    }

    for realm in live.keys() {
        if let Some(users) = realms_in_use.get(realm) {
            error!(
                "can't remove CephObjectRealm '{realm}' since it is used by CephObjectZoneGroup(s) {}",
                users.join(", ")
            );
            continue;
        }
        changed = true;
        if let Err(e) = delete_realm(stores, rook_ns, realm).await {
            error!(realm = %realm, error = %e, "Failed to remove CephObjectRealm");
            errors.push(e);
        }
    }
    join_errors(errors).map(|_| changed)
}

async fn ensure_zone_groups(pass: &PassContext<'_>, multisite: &MultiSiteSpec) -> Outcome {
    let rook_ns = pass.rook_namespace();
    let stores = pass.stores;
    let live = stores
        .zone_groups
        .list(None)
        .await
        .map_err(|e| format!("failed to get list CephObjectZoneGroups in '{rook_ns}' namespace: {e}"))?;
    let zones = stores
        .zones
        .list(None)
        .await
        .map_err(|e| format!("failed to get list CephObjectZones in '{rook_ns}' namespace: {e}"))?;
    let zone_groups_in_use = in_use(&zones, |z| Some(z.spec.zone_group.clone()));

    let desired = multisite
        .zone_groups
        .iter()
        .map(|zg| generate_zone_group(zg, rook_ns))
        .collect();
    let mut planned = plan(desired, live, rook_ns);
    let doomed = std::mem::take(&mut planned.delete);
    let (mut changed, mut errors) = execute(stores.zone_groups.as_ref(), planned, rook_ns).await;

    for zone_group in doomed {
        let name = zone_group.name_any();
        if let Some(users) = zone_groups_in_use.get(&name) {
            error!(
                "can't remove CephObjectZoneGroup '{name}' since it is used by CephObjectZone(s) {}",
                users.join(", ")
            );
            continue;
        }
        changed = true;
        if let Err(e) = delete_zone_group(stores, rook_ns, &name).await {
            errors.push(e);
        }
    }
    join_errors(errors).map(|_| changed)
}

/// Endpoints a zone advertises.
///
/// Explicit endpoints win. A zone served by the local gateway otherwise
/// advertises the ingress host, or the external Service address.
async fn zone_endpoints(pass: &PassContext<'_>, zone: &ZoneSpec) -> Result<Vec<String>, String> {
    if !zone.endpoints_for_zone.is_empty() {
        return Ok(zone.endpoints_for_zone.clone());
    }
    let Some(object_storage) = pass.spec().object_storage.as_ref() else {
        return Ok(Vec::new());
    };
    let rgw = &object_storage.rgw;
    if rgw.zone.as_ref().is_none_or(|z| z.name != zone.name) {
        return Ok(Vec::new());
    }
    let tls = pass
        .spec()
        .ingress_config
        .as_ref()
        .and_then(|i| i.tls_config.as_ref());
    if let Some(tls) = tls {
        return Ok(vec![format!("https://{}", public_host(&rgw.name, tls))]);
    }
    if pass.config.rgw_public_access_label().is_none() {
        warn!(zone = %zone.name, "Zone has no endpoints specified, no public access for rgw configured");
        return Ok(Vec::new());
    }

    let service_name = external_service_name(&rgw.name);
    let service = pass
        .stores
        .services
        .get(&service_name)
        .await
        .map_err(|e| format!("failed to get ip of external service: {e}"))?;
    let ip = service
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|i| i.ip.clone());
    match ip {
        Some(ip) => Ok(vec![format!("http://{ip}:80")]),
        None => {
            warn!(
                zone = %zone.name,
                service = %service_name,
                "Zone has no endpoints specified and the external service has no address yet, leaving empty"
            );
            Ok(Vec::new())
        }
    }
}

async fn ensure_zones(pass: &PassContext<'_>, multisite: &MultiSiteSpec) -> Outcome {
    let rook_ns = pass.rook_namespace();
    let stores = pass.stores;
    let live = stores
        .zones
        .list(None)
        .await
        .map_err(|e| format!("failed to get list CephObjectZones in '{rook_ns}' namespace: {e}"))?;
    let object_stores = stores
        .object_stores
        .list(None)
        .await
        .map_err(|e| format!("failed to check zones in use: {e}"))?;
    let zones_in_use = in_use(&object_stores, |s| Some(store_zone(s)));

    let preserve = pass
        .spec()
        .object_storage
        .as_ref()
        .is_some_and(|o| o.rgw.preserve_pools_on_delete);
    let mut desired = Vec::new();
    for zone in &multisite.zones {
        let endpoints = zone_endpoints(pass, zone).await?;
        desired.push(generate_zone(zone, endpoints, preserve, rook_ns));
    }

    let mut planned = plan(desired, live, rook_ns);
    for zone in &planned.update {
        warn!(
            zone = %zone.name_any(),
            "CephObjectZone pool changes are not reflected on the Ceph cluster, update pools manually if needed"
        );
    }
    let doomed = std::mem::take(&mut planned.delete);
    let (mut changed, mut errors) = execute(stores.zones.as_ref(), planned, rook_ns).await;

    for zone in doomed {
        let name = zone.name_any();
        if let Some(users) = zones_in_use.get(&name) {
            error!(
                "can't remove CephObjectZone '{name}' since it is used by CephObjectStore(s) {}",
                users.join(", ")
            );
            continue;
        }
        changed = true;
        if let Err(e) = delete_zone(stores, rook_ns, &name).await {
            errors.push(e);
        }
    }
    join_errors(errors).map(|_| changed)
}

/// Converge realms, zone groups and zones, in that order.
///
/// Later stages run even when an earlier one failed.
pub async fn ensure_multisite(pass: &PassContext<'_>) -> StepOutcome {
    let Some(object_storage) = pass.spec().object_storage.as_ref() else {
        return Ok(false);
    };
    let Some(multisite) = object_storage.multi_site.as_ref() else {
        return Ok(false);
    };
    debug!(deployment = %pass.key(), "Ensuring rgw multisite");
    let default_realm = default_realm_name(object_storage);

    let realms = ensure_realms(pass, multisite, default_realm.as_deref())
        .await
        .map_err(|e| format!("failed to ensure realms: {e}"));
    let zone_groups = ensure_zone_groups(pass, multisite)
        .await
        .map_err(|e| format!("failed to ensure zone groups: {e}"));
    let zones = ensure_zones(pass, multisite)
        .await
        .map_err(|e| format!("failed to ensure zones: {e}"));
    combine("multisite", [realms, zone_groups, zones])
}

/// Remove every multisite object that nothing references any more.
///
/// Returns `Ok(true)` only when nothing is left; removal of referenced
/// objects waits for a later pass.
pub async fn delete_multisite(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let zones = stores
        .zones
        .list(None)
        .await
        .map_err(|e| format!("failed to get list CephObjectZones in '{rook_namespace}' namespace: {e}"))?;
    let zone_groups = stores.zone_groups.list(None).await.map_err(|e| {
        format!("failed to get list CephObjectZoneGroups in '{rook_namespace}' namespace: {e}")
    })?;
    let realms = stores
        .realms
        .list(None)
        .await
        .map_err(|e| format!("failed to get list CephObjectRealms in '{rook_namespace}' namespace: {e}"))?;
    if zones.is_empty() && zone_groups.is_empty() && realms.is_empty() {
        return Ok(true);
    }
    let object_stores = stores
        .object_stores
        .list(None)
        .await
        .map_err(|e| format!("failed to check zones in use: {e}"))?;

    let zones_in_use = in_use(&object_stores, |s| Some(store_zone(s)));
    let zone_groups_in_use = in_use(&zones, |z| Some(z.spec.zone_group.clone()));
    let realms_in_use = in_use(&zone_groups, |zg| Some(zg.spec.realm.clone()));

    let mut errors = Vec::new();
    for zone in zones.iter().map(ResourceExt::name_any) {
        if let Some(users) = zones_in_use.get(&zone) {
            info!(zone = %zone, users = ?users, "CephObjectZone is used by an object store, waiting for its removal");
            continue;
        }
        if let Err(e) = delete_zone(stores, rook_namespace, &zone).await {
            errors.push(e);
        }
    }
    for zone_group in zone_groups.iter().map(ResourceExt::name_any) {
        if let Some(users) = zone_groups_in_use.get(&zone_group) {
            info!(zone_group = %zone_group, users = ?users, "CephObjectZoneGroup is used by zones, waiting for their removal");
            continue;
        }
        if let Err(e) = delete_zone_group(stores, rook_namespace, &zone_group).await {
            errors.push(e);
        }
    }
    for realm in realms.iter().map(ResourceExt::name_any) {
        if let Some(users) = realms_in_use.get(&realm) {
            info!(realm = %realm, users = ?users, "CephObjectRealm is used by zone groups, waiting for their removal");
            continue;
        }
        if let Err(e) = delete_realm(stores, rook_namespace, &realm).await {
            errors.push(e);
        }
    }
    if errors.is_empty() {
        Ok(false)
    } else {
        Err(format!("failed to cleanup multisite: {}", errors.join(", ")))
    }
}

/// Keys of a realm Secret, for inspection in tests and tooling.
pub fn realm_keys(secret: &Secret) -> Option<(String, String)> {
    let data = secret.data.as_ref()?;
    let read = |key: &str| {
        data.get(key)
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
    };
    Some((read("access-key")?, read("secret-key")?))
}
