//! `cephcluster` and `cluster state` steps, plus CephCluster removal.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::controller::common::{is_ceph_deployed, now_rfc3339};
use crate::controller::context::UpdateTimestamps;
use crate::controller::differ::{ObjectProcess, StepOutcome, process};
use crate::controller::pass::PassContext;
use crate::crd::{CephBlockPool, CephCluster, CleanupPolicySpec, PoolSpec};
use crate::resources::ceph_config::{
    CONFIG_KEY, build_ceph_config, generate_config_map, hash_annotation, updated_annotation,
};
use crate::resources::cluster::{generate_ceph_cluster, generate_cluster_spec};
use crate::resources::common::CONFIG_OVERRIDE_NAME;
use crate::resources::pools::generate_builtin_pool;
use crate::store::Stores;
use crate::store::exec::{CephCli, run_json};

/// Annotation with the time the config content last changed.
const CONFIG_GENERATED_ANNOTATION: &str = "cephdeployment.lcm.mirantis.com/config-generated";
const NOT_READY_STATES: [&str; 3] = ["Creating", "Connecting", "Updating"];
const NOT_READY_PHASES: [&str; 3] = ["Connecting", "Progressing", "Deleting"];
const CLEANUP_CONFIRMATION: &str = "yes-really-destroy-data";
const RGW_ROOT_POOL: &str = ".rgw.root";
const MGR_POOL: &str = ".mgr";

/// Ensure `rook-config-override` and refresh the section timestamps.
///
/// A section whose hash changed is stamped with the current time. An
/// unchanged section keeps the cached time, or the one recorded on the
/// ConfigMap when the cache has no entry.
async fn ensure_ceph_config(pass: &PassContext<'_>) -> StepOutcome {
    let rook_ns = pass.rook_namespace();
    let key = pass.key();
    let config = build_ceph_config(pass.spec(), rook_ns);
    let now = now_rfc3339();
    let store = pass.stores.config_maps.as_ref();

    let live = store
        .get(CONFIG_OVERRIDE_NAME)
        .await
        .map_err(|e| format!("failed to get ConfigMap {rook_ns}/{CONFIG_OVERRIDE_NAME}: {e}"))?;

    let Some(mut live) = live else {
        let mut annotations = BTreeMap::from([(CONFIG_GENERATED_ANNOTATION.to_string(), now.clone())]);
        let mut timestamps = BTreeMap::new();
        for (section, hash) in &config.hashes {
            annotations.insert(hash_annotation(section), hash.clone());
            annotations.insert(updated_annotation(section), now.clone());
            timestamps.insert(section.clone(), now.clone());
        }
        info!(namespace = %rook_ns, name = CONFIG_OVERRIDE_NAME, "Creating ceph config override");
        store
            .create(&generate_config_map(rook_ns, &config, annotations))
            .await
            .map_err(|e| format!("failed to create ConfigMap {rook_ns}/{CONFIG_OVERRIDE_NAME}: {e}"))?;
        pass.timestamps.store(&key, timestamps);
        return Ok(true);
    };

    let cached = pass.timestamps.snapshot(&key);
    let have = live.annotations().clone();
    let recorded = |annotation: &str| -> String {
        match have.get(annotation).filter(|v| !v.is_empty()) {
            Some(value) => value.clone(),
            None => {
                warn!(annotation = %annotation, "Missed config annotation, affected daemons will be restarted");
                now.clone()
            }
        }
    };

    let data_changed = live.data.as_ref().and_then(|d| d.get(CONFIG_KEY)) != Some(&config.rendered);
    let mut annotations = BTreeMap::from([(
        CONFIG_GENERATED_ANNOTATION.to_string(),
        if data_changed {
            now.clone()
        } else {
            recorded(CONFIG_GENERATED_ANNOTATION)
        },
    )]);
    let mut timestamps = BTreeMap::new();
    for (section, hash) in &config.hashes {
        let hash_key = hash_annotation(section);
        let updated_key = updated_annotation(section);
        let stamp = if have.get(&hash_key) != Some(hash) {
            debug!(section = %section, "Ceph config section changed");
            now.clone()
        } else {
            match cached.get(section).filter(|v| !v.is_empty()) {
                Some(value) => value.clone(),
                None => recorded(&updated_key),
            }
        };
        annotations.insert(hash_key, hash.clone());
        annotations.insert(updated_key, stamp.clone());
        timestamps.insert(section.clone(), stamp);
    }

    let mut changed = false;
    if data_changed || have != annotations {
        info!(namespace = %rook_ns, name = CONFIG_OVERRIDE_NAME, data_changed, "Updating ceph config override");
        live.data = Some(BTreeMap::from([(CONFIG_KEY.to_string(), config.rendered.clone())]));
        live.metadata.annotations = Some(annotations);
        store
            .update(&live)
            .await
            .map_err(|e| format!("failed to update ConfigMap {rook_ns}/{CONFIG_OVERRIDE_NAME}: {e}"))?;
        changed = true;
    }
    pass.timestamps.store(&key, timestamps);
    Ok(changed)
}

/// Fail when Rook is still working on the cluster.
fn check_cluster_readiness(cluster: &CephCluster, rook_namespace: &str) -> Result<(), String> {
    let Some(status) = cluster.status.as_ref() else {
        return Ok(());
    };
    let state = status.state.as_deref().unwrap_or_default();
    let phase = status.phase.as_deref().unwrap_or_default();
    if NOT_READY_STATES.contains(&state) || NOT_READY_PHASES.contains(&phase) {
        return Err(format!(
            "ceph cluster {rook_namespace}/{} is not ready to be updated: cluster state = '{state}', cluster phase = '{phase}'",
            cluster.name_any()
        ));
    }
    Ok(())
}

/// `cephcluster` step.
pub async fn ensure_cluster(pass: &PassContext<'_>) -> StepOutcome {
    let name = pass.name.as_str();
    let rook_ns = pass.rook_namespace();
    let store = pass.stores.clusters.as_ref();

    let live = store
        .get(name)
        .await
        .map_err(|e| format!("failed to get cephcluster {rook_ns}/{name}: {e}"))?;

    let mut changed = false;
    if !pass.spec().external {
        changed |= ensure_ceph_config(pass)
            .await
            .map_err(|e| format!("failed to ensure ceph config for {rook_ns}/{name} cephcluster: {e}"))?;
    }
    if let Some(cluster) = live.as_ref() {
        check_cluster_readiness(cluster, rook_ns)?;
    }

    let timestamps = pass.timestamps.snapshot(&pass.key());
    let spec = generate_cluster_spec(pass.spec(), pass.ceph_image(), &pass.nodes, &timestamps);
    match live {
        None => {
            info!(namespace = %rook_ns, name = %name, "Creating cephcluster");
            let cluster = generate_ceph_cluster(name, rook_ns, spec);
            process(store, ObjectProcess::Create, &cluster, rook_ns).await?;
            Ok(true)
        }
        Some(mut cluster) if cluster.spec != spec => {
            info!(namespace = %rook_ns, name = %name, "Updating cephcluster");
            cluster.spec = spec;
            process(store, ObjectProcess::Update, &cluster, rook_ns).await?;
            Ok(true)
        }
        Some(_) => Ok(changed),
    }
}

/// Remove the CephCluster, confirming data destruction first.
///
/// Returns `Ok(true)` only once the cluster is gone, which also drops the
/// deployment's config timestamps.
pub async fn delete_cluster(
    stores: &Stores,
    name: &str,
    rook_namespace: &str,
    timestamps: &UpdateTimestamps,
    key: &str,
) -> StepOutcome {
    let store = stores.clusters.as_ref();
    let Some(mut cluster) = store
        .get(name)
        .await
        .map_err(|e| format!("failed to get ceph cluster: {e}"))?
    else {
        timestamps.invalidate(key);
        return Ok(true);
    };
    cluster.spec.cleanup_policy = Some(CleanupPolicySpec {
        confirmation: CLEANUP_CONFIRMATION.to_string(),
        allow_uninstall_with_volumes: true,
    });
    info!(namespace = %rook_namespace, name = %name, "Setting ceph cluster cleanup policy before removal");
    store
        .update(&cluster)
        .await
        .map_err(|e| format!("failed to update ceph cluster with cleanupPolicy: {e}"))?;
    info!(namespace = %rook_namespace, name = %name, "Removing ceph cluster");
    match store.delete(name).await {
        Err(e) if !e.is_not_found() => Err(format!("failed to delete ceph cluster: {e}")),
        _ => Ok(false),
    }
}

#[derive(Debug, Default, Deserialize)]
struct MgrModuleLs {
    #[serde(default)]
    always_on_modules: Vec<String>,
    #[serde(default)]
    enabled_modules: Vec<String>,
}

async fn ensure_prometheus_module(cli: &dyn CephCli) -> crate::controller::error::Result<bool> {
    let modules: MgrModuleLs = run_json(cli, "ceph mgr module ls -f json").await?;
    let enabled = modules
        .always_on_modules
        .iter()
        .chain(&modules.enabled_modules)
        .any(|m| m == "prometheus");
    if enabled {
        return Ok(false);
    }
    info!("Enabling mgr module 'prometheus'");
    cli.run("ceph mgr module enable prometheus").await?;
    Ok(true)
}

async fn sync_progress_events(cli: &dyn CephCli, enable: bool) -> crate::controller::error::Result<bool> {
    let current = cli
        .run("ceph config get mgr mgr/progress/allow_pg_recovery_event")
        .await?;
    let current = current.trim();
    let wrong = if enable { current == "false" } else { current == "true" };
    if !wrong {
        return Ok(false);
    }
    info!(enable, "Switching mgr progress events");
    cli.run(&format!(
        "ceph config set mgr mgr/progress/allow_pg_recovery_event {enable}"
    ))
    .await?;
    Ok(true)
}

/// Layout a builtin pool should follow, when the spec defines one.
fn builtin_layout(pass: &PassContext<'_>, pool: &str) -> Option<PoolSpec> {
    let spec = pass.spec();
    if pool == RGW_ROOT_POOL {
        let object_storage = spec.object_storage.as_ref()?;
        return match object_storage.multi_site.as_ref() {
            Some(multisite) => {
                let zone = object_storage.rgw.zone.as_ref()?;
                multisite
                    .zones
                    .iter()
                    .find(|z| z.name == zone.name)
                    .map(|z| z.metadata_pool.clone())
            }
            None => object_storage.rgw.metadata_pool.clone(),
        };
    }
    spec.default_pool().map(|p| PoolSpec {
        device_class: p.device_class.clone(),
        failure_domain: p.failure_domain.clone(),
        replicated: p.replicated.clone(),
        erasure_coded: p.erasure_coded.clone(),
        parameters: p.parameters.clone(),
    })
}

/// Pin the builtin pools that exist in Ceph to a CephBlockPool override.
async fn ensure_builtin_pools(pass: &PassContext<'_>) -> std::result::Result<bool, String> {
    let rook_ns = pass.rook_namespace();
    let existing: Vec<String> = run_json(pass.stores.cli.as_ref(), "ceph osd pool ls -f json")
        .await
        .map_err(|e| format!("failed to check ceph pools: {e}"))?;

    let mut wanted: Vec<CephBlockPool> = Vec::new();
    for pool in [MGR_POOL, RGW_ROOT_POOL] {
        if !existing.iter().any(|p| p == pool) {
            continue;
        }
        match builtin_layout(pass, pool) {
            Some(layout) => wanted.push(generate_builtin_pool(pool, &layout, rook_ns)),
            None => warn!(pool = %pool, "Builtin pool found but the spec defines no layout for it, skipping"),
        }
    }
    if wanted.is_empty() {
        return Ok(false);
    }

    let store = pass.stores.block_pools.as_ref();
    let live = store
        .list(None)
        .await
        .map_err(|e| format!("failed to list CephBlockPools in '{rook_ns}' namespace: {e}"))?;
    let mut changed = false;
    let mut errors = Vec::new();
    for want in wanted {
        let pool_name = want.spec.name.clone().unwrap_or_default();
        let outcome = match live.iter().find(|p| p.spec.name == want.spec.name) {
            Some(current) if current.spec == want.spec => continue,
            Some(current) => {
                info!(pool = %pool_name, "Updating builtin pool override");
                let mut updated = current.clone();
                updated.spec = want.spec;
                process(store, ObjectProcess::Update, &updated, rook_ns)
                    .await
                    .map_err(|e| format!("failed to update '{pool_name}' CephBlockPool override: {e}"))
            }
            None => {
                info!(pool = %pool_name, "Creating builtin pool override");
                process(store, ObjectProcess::Create, &want, rook_ns)
                    .await
                    .map_err(|e| format!("failed to create '{pool_name}' CephBlockPool override: {e}"))
            }
        };
        match outcome {
            Ok(()) => changed = true,
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(changed)
    } else {
        Err(errors.join("; "))
    }
}

/// `cluster state` step: in-place fixes on a running cluster.
///
/// Until the monitors exist there is nothing to check; the step then reports
/// a change so the pass keeps waiting.
pub async fn ensure_cluster_state(pass: &PassContext<'_>) -> StepOutcome {
    if !is_ceph_deployed(pass.stores).await {
        warn!(namespace = %pass.rook_namespace(), "Mon endpoints ConfigMap not found, cluster state ensure skipped");
        return Ok(true);
    }
    let cli = pass.stores.cli.as_ref();
    let prometheus = ensure_prometheus_module(cli)
        .await
        .map_err(|e| format!("failed to verify mgr modules 'prometheus' enabled: {e}"))?;
    let enable_events = pass
        .spec()
        .extra_opts
        .as_ref()
        .is_some_and(|o| o.enable_progress_events);
    let events = sync_progress_events(cli, enable_events)
        .await
        .map_err(|e| format!("failed to verify mgr progress events state: {e}"))?;
    let pools = ensure_builtin_pools(pass)
        .await
        .map_err(|e| format!("failed to verify builtin pools have corresponding CephBlockPools: {e}"))?;
    Ok(prometheus || events || pools)
}
