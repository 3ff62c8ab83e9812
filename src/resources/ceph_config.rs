//! Rendering of the `rook-config-override` ceph.conf.
//!
//! Sections are written `global`, `mon`, `mgr` first and the rest sorted;
//! in `[global]` the network options come first. Every daemon group the
//! operator can restart (global, mon, mgr, each mds and each rgw section) gets
//! a content hash, so a change can be pinned to the daemons it affects.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use tracing::warn;

use crate::crd::CephDeploymentSpec;
use crate::resources::common::{CONFIG_OVERRIDE_NAME, child_meta, rgw_resource_name};

/// ConfigMap data key holding the rendered config.
pub const CONFIG_KEY: &str = "config";

const SECTION_DELIMITER: char = '|';
const LEADING_SECTIONS: [&str; 3] = ["global", "mon", "mgr"];
const LEADING_GLOBAL_KEYS: [&str; 2] = ["cluster_network", "public_network"];
/// Options the user cannot override.
const STATIC_KEYS: [&str; 2] = ["cluster_network", "public_network"];
const MAX_RGW_THREAD_POOL_SIZE: u32 = 256;

const GENERAL_OPTIONS: [(&str, &str, &str); 7] = [
    ("global", "mon_target_pg_per_osd", "100"),
    ("global", "mon_max_pg_per_osd", "300"),
    ("mon", "mon_warn_on_insecure_global_id_reclaim", "false"),
    ("mon", "mon_warn_on_insecure_global_id_reclaim_allowed", "false"),
    ("osd", "osd_class_dir", "/usr/lib64/rados-classes"),
    ("osd", "bdev_enable_discard", "true"),
    ("osd", "bdev_async_discard_threads", "1"),
];

const RGW_OPTIONS: [(&str, &str); 9] = [
    ("rgw_data_log_backing", "omap"),
    ("rgw_max_attr_name_len", "64"),
    ("rgw_max_attrs_num_in_req", "32"),
    ("rgw_max_attr_size", "1024"),
    ("rgw_bucket_quota_ttl", "30"),
    ("rgw_user_quota_bucket_sync_interval", "30"),
    ("rgw_user_quota_sync_interval", "30"),
    ("rgw_trust_forwarded_https", "true"),
    ("rgw_thread_pool_size", "256"),
];

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Rendered config plus per-group hashes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CephConfig {
    pub rendered: String,
    pub hashes: BTreeMap<String, String>,
}

/// `cephdeployment.lcm.mirantis.com/config-<section>-hash`
pub fn hash_annotation(section: &str) -> String {
    format!("cephdeployment.lcm.mirantis.com/config-{section}-hash")
}

/// `cephdeployment.lcm.mirantis.com/config-<section>-updated`
pub fn updated_annotation(section: &str) -> String {
    format!("cephdeployment.lcm.mirantis.com/config-{section}-updated")
}

/// Config section of the rgw daemons of an object store.
pub fn rgw_config_section(rgw: &str) -> String {
    format!("client.rgw.{}.a", rgw.replace('-', "."))
}

/// Split a `section|key` rookConfig key; spaces and hyphens become underscores.
pub fn split_key(raw: &str) -> (Option<&str>, String) {
    let (section, key) = match raw.split_once(SECTION_DELIMITER) {
        Some((section, key)) => (Some(section), key),
        None => (None, raw),
    };
    (section, key.replace([' ', '-'], "_"))
}

/// FNV-1a 64-bit hash formatted as hex.
pub fn fnv1a_hex(data: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET;
    for &byte in data.as_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

fn insert(sections: &mut Sections, section: &str, key: &str, value: &str) {
    sections
        .entry(section.to_string())
        .or_default()
        .insert(key.to_string(), value.to_string());
}

/// Defaults merged with the user's rookConfig.
fn collect_sections(spec: &CephDeploymentSpec, rook_namespace: &str) -> Sections {
    let mut sections = Sections::new();
    insert(&mut sections, "global", "cluster_network", &spec.network.cluster_net);
    insert(&mut sections, "global", "public_network", &spec.network.public_net);
    for (section, key, value) in GENERAL_OPTIONS {
        insert(&mut sections, section, key, value);
    }

    let mut defaults_by_key: BTreeMap<String, String> = GENERAL_OPTIONS
        .iter()
        .map(|(section, key, _)| (key.to_string(), section.to_string()))
        .collect();

    if let Some(object_storage) = spec.object_storage.as_ref() {
        let rgw = &object_storage.rgw.name;
        let section = rgw_config_section(rgw);
        for (key, value) in RGW_OPTIONS {
            insert(&mut sections, &section, key, value);
            defaults_by_key.insert(key.to_string(), section.clone());
        }
        let dns_name = match spec
            .ingress_config
            .as_ref()
            .and_then(|i| i.tls_config.as_ref())
        {
            Some(tls) => format!(
                "{}.{}",
                tls.hostname.as_deref().unwrap_or(rgw),
                tls.public_domain
            ),
            None => format!("{}.{rook_namespace}.svc", rgw_resource_name(rgw, None)),
        };
        insert(&mut sections, &section, "rgw_dns_name", &dns_name);
    }

    for (raw, value) in &spec.rook_config {
        let (section, key) = split_key(raw);
        let section = match section {
            Some(section) => section.to_string(),
            None => {
                let section = defaults_by_key
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| "global".to_string());
                warn!(option = %raw, section = %section, "rookConfig option has no section, using default section");
                section
            }
        };
        if section == "global" && STATIC_KEYS.contains(&key.as_str()) {
            continue;
        }
        let mut value = value.clone();
        if key == "rgw_thread_pool_size" {
            match value.parse::<u32>() {
                Ok(size) if size <= MAX_RGW_THREAD_POOL_SIZE => {}
                _ => {
                    warn!(option = %raw, value = %value, "Invalid rgw_thread_pool_size, using default");
                    value = MAX_RGW_THREAD_POOL_SIZE.to_string();
                }
            }
        }
        insert(&mut sections, &section, &key, &value);
    }
    sections
}

/// Hash group a section belongs to, if its daemons are restarted on change.
fn hash_group(section: &str) -> Option<String> {
    if section == "global" {
        Some("global".to_string())
    } else if section.starts_with("mon") {
        Some("mon".to_string())
    } else if section.starts_with("mgr") {
        Some("mgr".to_string())
    } else if section.starts_with("mds") || section.starts_with("client.rgw") {
        Some(section.to_string())
    } else {
        None
    }
}

fn ordered<'a>(mut keys: Vec<&'a str>, leading: &[&str]) -> Vec<&'a str> {
    keys.sort_unstable();
    let mut out: Vec<&str> = Vec::with_capacity(keys.len());
    for lead in leading {
        if let Some(pos) = keys.iter().position(|k| k == lead) {
            out.push(keys.remove(pos));
        }
    }
    out.extend(keys);
    out
}

fn render(sections: &Sections) -> CephConfig {
    let mut rendered = String::new();
    let mut groups: BTreeMap<String, String> = BTreeMap::new();

    let names: Vec<&str> = sections.keys().map(String::as_str).collect();
    for (idx, section) in ordered(names, &LEADING_SECTIONS).into_iter().enumerate() {
        let Some(options) = sections.get(section) else {
            continue;
        };
        if idx > 0 {
            rendered.push('\n');
        }
        rendered.push_str(&format!("[{section}]\n"));
        let keys: Vec<&str> = options.keys().map(String::as_str).collect();
        let keys = if section == "global" {
            ordered(keys, &LEADING_GLOBAL_KEYS)
        } else {
            ordered(keys, &[])
        };
        let group = hash_group(section);
        for key in keys {
            let line = format!("{key} = {}\n", options[key]);
            if let Some(group) = group.as_ref() {
                groups.entry(group.clone()).or_default().push_str(&line);
            }
            rendered.push_str(&line);
        }
    }

    CephConfig {
        rendered,
        hashes: groups
            .into_iter()
            .map(|(group, content)| (group, fnv1a_hex(&content)))
            .collect(),
    }
}

/// Render the config override for a deployment.
pub fn build_ceph_config(spec: &CephDeploymentSpec, rook_namespace: &str) -> CephConfig {
    render(&collect_sections(spec, rook_namespace))
}

/// The override ConfigMap carrying `config` and its annotations.
pub fn generate_config_map(
    rook_namespace: &str,
    config: &CephConfig,
    annotations: BTreeMap<String, String>,
) -> ConfigMap {
    let mut meta = child_meta(CONFIG_OVERRIDE_NAME, rook_namespace);
    meta.annotations = Some(annotations);
    ConfigMap {
        metadata: meta,
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            config.rendered.clone(),
        )])),
        ..Default::default()
    }
}
