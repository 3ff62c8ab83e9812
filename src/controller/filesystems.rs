//! `shared filesystems` step.
//!
//! CephFilesystems are converged through the Differ plan, with two extras
//! around it: the CSI subvolumegroup of a filesystem is removed before the
//! filesystem itself, and is created for every filesystem that already
//! existed before this pass.

use std::collections::BTreeSet;

use kube::ResourceExt;
use serde::Deserialize;
use tracing::{error, info};

use crate::controller::differ::{StepOutcome, aggregate_errors, execute, plan};
use crate::controller::error::Result;
use crate::controller::pass::PassContext;
use crate::resources::common::CSI_SUBVOLUME_GROUP;
use crate::resources::filesystems::generate_filesystem;
use crate::store::Stores;
use crate::store::exec::{CephCli, run_json};

#[derive(Debug, Deserialize)]
struct SubvolumeGroup {
    name: String,
}

async fn has_csi_group(cli: &dyn CephCli, fs: &str) -> Result<bool> {
    let groups: Vec<SubvolumeGroup> =
        run_json(cli, &format!("ceph fs subvolumegroup ls {fs} -f json")).await?;
    Ok(groups.iter().any(|g| g.name == CSI_SUBVOLUME_GROUP))
}

/// Create the CSI subvolumegroup when missing. Returns whether it was created.
async fn ensure_csi_group(cli: &dyn CephCli, fs: &str) -> std::result::Result<bool, String> {
    let present = has_csi_group(cli, fs)
        .await
        .map_err(|e| format!("failed to list CephFS {fs} subvolumegroup: {e}"))?;
    if present {
        return Ok(false);
    }
    info!(filesystem = %fs, "Creating CephFS subvolumegroup for CSI");
    cli.run(&format!("ceph fs subvolumegroup create {fs} {CSI_SUBVOLUME_GROUP}"))
        .await
        .map_err(|e| format!("failed to create CephFS {fs} subvolumegroup: {e}"))?;
    Ok(true)
}

/// Remove the CSI subvolumegroup when present.
async fn remove_csi_group(cli: &dyn CephCli, fs: &str) -> std::result::Result<(), String> {
    let present = has_csi_group(cli, fs)
        .await
        .map_err(|e| format!("failed to list CephFS {fs} subvolumegroup: {e}"))?;
    if present {
        info!(filesystem = %fs, "Removing CephFS subvolumegroup for CSI");
        cli.run(&format!("ceph fs subvolumegroup rm {fs} {CSI_SUBVOLUME_GROUP}"))
            .await
            .map_err(|e| format!("failed to remove CephFS {fs} subvolumegroup: {e}"))?;
    }
    Ok(())
}

pub async fn ensure_shared_filesystems(pass: &PassContext<'_>) -> StepOutcome {
    let filesystems = match pass.spec().shared_filesystem.as_ref() {
        Some(shared) if !shared.ceph_fs.is_empty() => &shared.ceph_fs,
        _ => {
            return delete_shared_filesystems(pass.stores, pass.rook_namespace())
                .await
                .map(|removed| !removed);
        }
    };
    let rook_ns = pass.rook_namespace();
    let store = pass.stores.filesystems.as_ref();
    let cli = pass.stores.cli.as_ref();

    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to get CephFS list: {e}"))?;
    let desired = filesystems
        .iter()
        .map(|fs| generate_filesystem(fs, rook_ns))
        .collect();
    let mut planned = plan(desired, live, rook_ns);

    let mut errors = Vec::new();
    let mut doomed = Vec::new();
    for fs in std::mem::take(&mut planned.delete) {
        match remove_csi_group(cli, &fs.name_any()).await {
            Ok(()) => doomed.push(fs),
            Err(e) => {
                error!(filesystem = %fs.name_any(), error = %e, "Skipping CephFS removal");
                errors.push(e);
            }
        }
    }
    planned.delete = doomed;

    let created: BTreeSet<String> = planned.create.iter().map(|fs| fs.name_any()).collect();
    let (mut changed, executed) = execute(store, planned, rook_ns).await;
    errors.extend(executed);

    for fs in filesystems.iter().filter(|fs| !created.contains(&fs.name)) {
        match ensure_csi_group(cli, &fs.name).await {
            Ok(created) => changed |= created,
            Err(e) => errors.push(e),
        }
    }
    match aggregate_errors("CephFS", &errors) {
        Some(message) => Err(message),
        None => Ok(changed),
    }
}

/// Remove every CephFilesystem, subvolumegroup first.
pub async fn delete_shared_filesystems(stores: &Stores, rook_namespace: &str) -> StepOutcome {
    let store = stores.filesystems.as_ref();
    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to get CephFS list: {e}"))?;
    if live.is_empty() {
        return Ok(true);
    }
    let mut issues = 0;
    for fs in live {
        let name = fs.name_any();
        if let Err(e) = remove_csi_group(stores.cli.as_ref(), &name).await {
            error!(filesystem = %name, error = %e, "Failed to remove CephFS subvolumegroup");
            issues += 1;
            continue;
        }
        info!(filesystem = %name, namespace = %rook_namespace, "Removing CephFS");
        match store.delete(&name).await {
            Err(e) if !e.is_not_found() => {
                error!(filesystem = %name, error = %e, "Failed to remove CephFS");
                issues += 1;
            }
            _ => {}
        }
    }
    if issues > 0 {
        return Err("some CephFS failed to delete".to_string());
    }
    Ok(false)
}
