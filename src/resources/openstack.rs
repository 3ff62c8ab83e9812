//! Secret shared with the OpenStack services consuming the cluster.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;

use crate::crd::{CephDeploymentSpec, CephPool};
use crate::resources::common::{child_meta, rgw_resource_name};
use crate::resources::object_storage::public_host;

/// Name of the shared secret.
pub const OPENSTACK_SECRET_NAME: &str = "openstack-ceph-keys";
/// Rook secret holding the admin key.
pub const ADMIN_SECRET_NAME: &str = "rook-ceph-mon";

static MON_ID_RE: LazyLock<Option<regex::Regex>> = LazyLock::new(|| regex::Regex::new(r"[a-z]=").ok());

/// Ceph users the OpenStack services authenticate as.
pub fn openstack_clients(with_manila: bool) -> Vec<&'static str> {
    let mut clients = vec!["cinder", "glance", "nova"];
    if with_manila {
        clients.push("manila");
    }
    clients
}

/// Admin key entry of the Rook admin secret.
pub fn admin_key_field(external: bool) -> &'static str {
    if external { "admin-secret" } else { "ceph-secret" }
}

/// Inputs gathered from the cluster.
#[derive(Clone, Debug, Default)]
pub struct OpenstackKeys {
    /// Auth key per client name.
    pub client_keys: BTreeMap<String, String>,
    pub admin_key: Vec<u8>,
    /// Raw `data` of the monitor endpoints ConfigMap, `a=ip:port,b=...`.
    pub mon_endpoints: String,
}

/// Monitor addresses without their ids, sorted.
pub fn mon_addresses(raw: &str) -> String {
    let stripped = match MON_ID_RE.as_ref() {
        Some(re) => re.replace_all(raw, "").into_owned(),
        None => raw.to_string(),
    };
    let mut addresses: Vec<&str> = stripped.split(',').collect();
    addresses.sort_unstable();
    addresses.join(",")
}

fn pool_entry(pool: &CephPool, role: &str) -> String {
    format!(";{}:{}:{}", pool.block_pool_name(), role, pool.device_class)
}

/// `client.<name>;<key>\n` followed by the pools the client works with.
fn client_lines(spec: &CephDeploymentSpec, keys: &BTreeMap<String, String>) -> BTreeMap<&'static str, String> {
    let mut lines: BTreeMap<&'static str, String> = ["glance", "nova", "cinder"]
        .into_iter()
        .map(|c| {
            let key = keys.get(c).map(String::as_str).unwrap_or_default();
            (c, format!("client.{c};{key}\n"))
        })
        .collect();
    let mut append = |client: &'static str, entry: &str| {
        if let Some(line) = lines.get_mut(client) {
            line.push_str(entry);
        }
    };
    for pool in &spec.pools {
        match pool.role.as_str() {
            "volumes" | "volumes-backend" => {
                let entry = pool_entry(pool, "volumes");
                append("nova", &entry);
                append("cinder", &entry);
            }
            "vms" => append("nova", &pool_entry(pool, "vms")),
            "images" => {
                let entry = pool_entry(pool, "images");
                append("nova", &entry);
                append("glance", &entry);
                append("cinder", &entry);
            }
            "backup" => append("cinder", &pool_entry(pool, "backup")),
            _ => {}
        }
    }
    lines
}

/// Build the shared secret for `spec`.
pub fn generate_openstack_secret(
    spec: &CephDeploymentSpec,
    keys: &OpenstackKeys,
    rook_namespace: &str,
    shared_namespace: &str,
) -> Secret {
    let bytes = |value: &str| ByteString(value.as_bytes().to_vec());
    let mut data: BTreeMap<String, ByteString> = client_lines(spec, &keys.client_keys)
        .into_iter()
        .map(|(client, line)| (client.to_string(), bytes(&line)))
        .collect();
    data.insert("client.admin".to_string(), ByteString(keys.admin_key.clone()));
    data.insert("mon_endpoints".to_string(), bytes(&mon_addresses(&keys.mon_endpoints)));
    if let Some(key) = keys.client_keys.get("manila") {
        data.insert("manila".to_string(), bytes(&format!("client.manila;{key}\n")));
    }

    if let Some(object_storage) = spec.object_storage.as_ref() {
        let rgw = &object_storage.rgw;
        if !spec.external {
            let fqdn = format!("{}.{rook_namespace}.svc", rgw_resource_name(&rgw.name, None));
            let internal = if rgw.gateway.secure_port != 0 {
                format!("https://{fqdn}:{}/", rgw.gateway.secure_port)
            } else {
                format!("http://{fqdn}:{}/", rgw.gateway.port)
            };
            data.insert("rgw_internal".to_string(), bytes(&internal));
            let tls = spec.ingress_config.as_ref().and_then(|i| i.tls_config.as_ref());
            if let Some(tls) = tls {
                data.insert(
                    "rgw_external".to_string(),
                    bytes(&format!("https://{}/", public_host(&rgw.name, tls))),
                );
            }
        }
    }

    Secret {
        metadata: child_meta(OPENSTACK_SECRET_NAME, shared_namespace),
        data: Some(data),
        ..Default::default()
    }
}
