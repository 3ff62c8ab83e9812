//! ceph-deployment-operator entry point.
//!
//! Startup order:
//! 1. structured logging (`LOG_FORMAT=json|text`)
//! 2. Kubernetes client and `OperatorConfig` from the environment
//! 3. health and metrics server, answering health checks even while not leader
//! 4. lease-based leader election; the controller only runs as leader

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ceph_deployment_operator::controller::config::OperatorConfig;
use ceph_deployment_operator::health::{HealthState, run_health_server};
use ceph_deployment_operator::run_controller;

const LEASE_NAME: &str = "ceph-deployment-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Namespace the operator is deployed to when the downward API is missing.
const DEFAULT_POD_NAMESPACE: &str = "ceph-lcm-mirantis";

/// Time given to in-flight passes before the process exits.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Who competes for the lease, and where the lease lives.
struct LeaderIdentity {
    holder_id: String,
    namespace: String,
}

impl LeaderIdentity {
    fn from_env() -> Self {
        let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!(namespace = DEFAULT_POD_NAMESPACE, "POD_NAMESPACE not set, using default");
            DEFAULT_POD_NAMESPACE.to_string()
        });
        Self { holder_id, namespace }
    }

    fn lease_lock(&self, client: Client) -> LeaseLock {
        LeaseLock::new(
            client,
            &self.namespace,
            LeaseLockParams {
                holder_id: self.holder_id.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: LEASE_TTL,
            },
        )
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("ceph_deployment_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("text") => builder.init(),
        _ => builder.json().init(),
    }
    Ok(())
}

/// Block until this instance holds the lease.
async fn acquire_leadership(lock: &LeaseLock) {
    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!(error = %e, "Failed to acquire lease, retrying"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease forever; exit the process as soon as it is lost so the
/// pod restarts and rejoins the election.
#[allow(clippy::exit)]
fn keep_leadership(lock: LeaseLock) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
            match lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Lost leadership, shutting down");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Failed to renew lease, shutting down");
                    std::process::exit(1);
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;
    info!("Starting ceph-deployment-operator");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let config = OperatorConfig::from_env();
    info!(
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("all"),
        rook_namespace = %config.rook_namespace,
        ceph_image = %config.ceph_image,
        requeue_interval_secs = config.requeue_interval.as_secs(),
        network_policies = config.network_policies,
        "Loaded operator configuration"
    );

    let health_state = Arc::new(HealthState::new());
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!(error = %e, "Health server error");
            }
        })
    };

    let identity = LeaderIdentity::from_env();
    info!(
        holder_id = %identity.holder_id,
        namespace = %identity.namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );
    acquire_leadership(&identity.lease_lock(client.clone())).await;
    let renewal_handle = keep_leadership(identity.lease_lock(client.clone()));

    let controller_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            run_controller(client, Some(health_state), config).await;
        })
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        // Renewal only returns by panicking; losing the lease exits the process.
        Err(e) = renewal_handle => {
            error!(error = %e, "Lease renewal task panicked");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            health_state.set_ready(false).await;
            info!(
                grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                "Marked operator as not ready, waiting for in-flight passes"
            );
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
///
/// Failing to install a handler is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
