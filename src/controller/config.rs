//! Operator configuration read from the environment at startup.

use std::time::Duration;

use tracing::warn;

/// Default namespace for Rook child resources.
pub const DEFAULT_ROOK_NAMESPACE: &str = "rook-ceph";
/// Default Ceph image deployed by the operator.
pub const DEFAULT_CEPH_IMAGE: &str = "quay.io/ceph/ceph:v19.2.3";
/// Default selector marking the external rgw Service.
pub const DEFAULT_RGW_PUBLIC_ACCESS_LABEL: &str = "external_rgw_access=true";
/// Default namespace of the secret shared with OpenStack services.
pub const DEFAULT_OPENSTACK_SHARED_NAMESPACE: &str = "openstack-ceph-shared";

const DEFAULT_HEALTH_PORT: u16 = 8080;
const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 60;
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Runtime settings shared by every reconcile pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Only watch CephDeployments in this namespace; cluster-wide when unset.
    pub watch_namespace: Option<String>,
    pub rook_namespace: String,
    pub ceph_image: String,
    pub requeue_interval: Duration,
    pub exec_timeout: Duration,
    pub network_policies: bool,
    /// `key=value` label put on the external rgw Service.
    pub rgw_public_access_label: String,
    /// Port of the health and metrics server.
    pub health_port: u16,
    pub openstack_shared_namespace: String,
    /// Image Rook apps are expected to run; unset skips the check.
    pub rook_image: Option<String>,
    /// Nodes matching this selector never get the daemonset label.
    pub daemonset_exclude_selector: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            rook_namespace: DEFAULT_ROOK_NAMESPACE.to_string(),
            ceph_image: DEFAULT_CEPH_IMAGE.to_string(),
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_INTERVAL_SECS),
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            network_policies: false,
            rgw_public_access_label: DEFAULT_RGW_PUBLIC_ACCESS_LABEL.to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            openstack_shared_namespace: DEFAULT_OPENSTACK_SHARED_NAMESPACE.to_string(),
            rook_image: None,
            daemonset_exclude_selector: None,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary lookup.
    ///
    /// Unparseable values fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
            rook_namespace: lookup("ROOK_NAMESPACE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.rook_namespace),
            ceph_image: lookup("CEPH_IMAGE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.ceph_image),
            requeue_interval: parse_secs(
                &lookup,
                "REQUEUE_INTERVAL_SECS",
                defaults.requeue_interval,
            ),
            exec_timeout: parse_secs(&lookup, "EXEC_TIMEOUT_SECS", defaults.exec_timeout),
            network_policies: match lookup("NETWORK_POLICIES_ENABLED") {
                Some(v) => v.parse().unwrap_or_else(|_| {
                    warn!(value = %v, "Invalid NETWORK_POLICIES_ENABLED, using default");
                    defaults.network_policies
                }),
                None => defaults.network_policies,
            },
            rgw_public_access_label: lookup("RGW_PUBLIC_ACCESS_LABEL")
                .unwrap_or(defaults.rgw_public_access_label),
            health_port: match lookup("HEALTH_PORT") {
                Some(v) => v.parse().unwrap_or_else(|_| {
                    warn!(value = %v, "Invalid HEALTH_PORT, using default");
                    defaults.health_port
                }),
                None => defaults.health_port,
            },
            openstack_shared_namespace: lookup("OPENSTACK_CEPH_SHARED_NAMESPACE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.openstack_shared_namespace),
            rook_image: lookup("ROOK_IMAGE").filter(|v| !v.is_empty()),
            daemonset_exclude_selector: lookup("CEPH_DAEMONSET_PLACEMENT_LABEL_EXCLUDE")
                .filter(|v| !v.trim().is_empty()),
        }
    }

    /// The public access label split into key and value.
    pub fn rgw_public_access_label(&self) -> Option<(&str, &str)> {
        self.rgw_public_access_label
            .split_once('=')
            .filter(|(k, _)| !k.is_empty())
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => match v.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!(key = key, value = %v, "Invalid duration, using default");
                default
            }
        },
        None => default,
    }
}
