// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the CephDeployment convergence engine.
//!
//! These tests drive the real reconcile passes WITHOUT requiring a live
//! Kubernetes cluster. Every store is an in-memory `MemoryStore` and the Ceph
//! toolbox is a scripted CLI.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_running_cluster_converges_to_ready
//! ```
//!
//! ## Test Categories
//!
//! - **Pass tests**: full passes from a fresh object to Ready and back out
//! - **Phase tests**: phase decisions across consecutive passes
//! - **Differ tests**: create/update/delete planning for one child kind
//! - **Multisite and teardown tests**: removal ordering
//! - **OpenStack tests**: the secret shared with OpenStack services

#[path = "../common/mod.rs"]
mod common;

mod differ_tests;
mod harness;
mod multisite_tests;
mod openstack_tests;
mod pass_tests;
mod phase_tests;
