//! Ceph version gate.
//!
//! Compares the versions reported by the running daemons against the
//! version of the configured image and refuses downgrades or upgrades that
//! skip a major release.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use semver::Version;
use serde::Deserialize;
use tracing::{debug, info};

use crate::controller::common::is_ceph_deployed;
use crate::store::Stores;
use crate::store::exec::run_json;

const VERSIONS_COMMAND: &str = "ceph versions";

static VERSION_RE: LazyLock<Option<regex::Regex>> =
    LazyLock::new(|| regex::Regex::new(r"(\d+)\.(\d+)\.(\d+)").ok());

#[derive(Debug, Default, Deserialize)]
struct CephVersions {
    #[serde(default)]
    overall: BTreeMap<String, u32>,
}

/// First `x.y.z` found in `text`.
pub fn parse_version(text: &str) -> Option<Version> {
    let found = VERSION_RE.as_ref()?.find(text)?;
    Version::parse(found.as_str()).ok()
}

/// Version from the tag of a ceph image, e.g. `quay.io/ceph/ceph:v19.2.3-cve`.
pub fn image_version(image: &str) -> Option<Version> {
    let (_, tag) = image.rsplit_once(':')?;
    parse_version(tag)
}

/// Reject moving from `current` to `target` when it is a downgrade or jumps
/// more than one major release.
pub fn check_transition(current: &Version, target: &Version) -> Result<(), String> {
    if current > target {
        return Err(format!(
            "detected Ceph version downgrade from '{current}' to '{target}': downgrade is not possible"
        ));
    }
    if target.major.saturating_sub(current.major) > 1 {
        return Err(format!(
            "detected Ceph version upgrade from '{current}' to '{target}': upgrade with step over one major version is not possible"
        ));
    }
    Ok(())
}

/// Check the running cluster against `ceph_image`.
///
/// Returns the value for `status.clusterVersion`: `None` before the
/// monitors exist, otherwise every running version as `v<x.y.z>`, lowest
/// first.
pub async fn check_version(stores: &Stores, ceph_image: &str) -> Result<Option<String>, String> {
    if !is_ceph_deployed(stores).await {
        debug!("Ceph is not deployed yet, skipping version check");
        return Ok(None);
    }
    let target = image_version(ceph_image)
        .ok_or_else(|| format!("failed to identify Ceph version for image '{ceph_image}'"))?;
    let versions: CephVersions = run_json(stores.cli.as_ref(), VERSIONS_COMMAND)
        .await
        .map_err(|e| format!("failed to get current Ceph versions: {e}"))?;

    let mut running: Vec<Version> = versions.overall.keys().filter_map(|v| parse_version(v)).collect();
    running.sort();
    running.dedup();
    let Some(lowest) = running.first() else {
        return Err("failed to verify Ceph version in cluster: no versions reported".to_string());
    };
    check_transition(lowest, &target)?;
    if lowest < &target {
        info!(current = %lowest, target = %target, "Detected Ceph version change");
    }
    let status = running
        .iter()
        .map(|v| format!("v{v}"))
        .collect::<Vec<_>>()
        .join(",");
    Ok(Some(status))
}
