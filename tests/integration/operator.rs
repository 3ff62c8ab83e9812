//! Scoped operator spawning for integration tests.
//!
//! Runs the CephDeployment controller against a single test namespace, which
//! also serves as the Rook namespace.
//!
//! # Usage
//!
//! ```rust,ignore
//! let operator = ScopedOperator::start(client.clone(), "my-namespace").await;
//! // ... run tests ...
//! // operator is automatically stopped when dropped
//! ```
//!
//! The controller panics if it exits unexpectedly, so tests fail immediately
//! rather than timing out.

use std::sync::Arc;
use std::time::Duration;

use ceph_deployment_operator::controller::config::OperatorConfig;
use kube::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A scoped operator instance for integration testing.
///
/// Stopped automatically when dropped.
pub struct ScopedOperator {
    handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    namespace: Arc<str>,
}

impl ScopedOperator {
    /// Start a new operator instance watching a specific namespace.
    pub async fn start(client: Client, namespace: &str) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ns: Arc<str> = namespace.into();

        info!("Starting scoped operator in namespace: {}", ns);

        let handle = Self::spawn_controller(client, Arc::clone(&ns), shutdown_rx);

        // Give the controller a moment to start watching
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
            namespace: ns,
        }
    }

    /// Configuration pointing every namespaced child at the test namespace.
    fn config(namespace: &str) -> OperatorConfig {
        OperatorConfig {
            rook_namespace: namespace.to_string(),
            requeue_interval: Duration::from_secs(5),
            exec_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn spawn_controller(
        client: Client,
        namespace: Arc<str>,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let config = Self::config(&namespace);
            tokio::select! {
                _ = ceph_deployment_operator::run_controller_scoped(client, None, config, Some(&namespace)) => {
                    panic!("CephDeployment controller exited unexpectedly");
                }
                _ = shutdown_rx => {
                    debug!("Controller received shutdown signal");
                }
            }
        })
    }

    /// Check if the operator is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Get the namespace being watched.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Drop for ScopedOperator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}
