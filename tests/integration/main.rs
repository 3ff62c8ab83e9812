// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for ceph-deployment-operator
//!
//! These tests require a running Kubernetes cluster accessible via kubeconfig,
//! with the CephDeployment and Rook CRDs installed. No Rook operator is
//! needed: the tests only check what this operator writes.
//! Tests are marked with #[ignore] and must be run explicitly:
//!
//! ```bash
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration test_creates_ceph_cluster -- --ignored
//! ```
//!
//! ## Design Principles
//!
//! - **Isolation**: each test creates its own namespace and a scoped operator
//!   that uses it both as the CephDeployment and the Rook namespace
//! - **RAII Cleanup**: TestNamespace implements Drop for cleanup even on panic
//! - **Watch-Based Waiting**: kube-rs watches instead of polling loops

#[path = "../common/mod.rs"]
mod common;

mod namespace;
mod operator;
mod wait;


use kube::Client;
use tokio::sync::OnceCell;

/// Connectivity is checked once per test binary.
static CONNECTED: OnceCell<()> = OnceCell::const_new();

/// Set up tracing, check the API server once, and hand out a fresh client.
pub async fn init_test() -> Client {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("ceph_deployment_operator=debug")
        .try_init();

    let client = Client::try_default()
        .await
        .expect("Failed to connect to Kubernetes cluster. Is your kubeconfig configured?");
    CONNECTED
        .get_or_init(|| async {
            let version = client
                .apiserver_version()
                .await
                .expect("API server is not reachable");
            tracing::info!(platform = %version.platform, version = %version.git_version, "Connected to Kubernetes cluster");
        })
        .await;
    client
}
