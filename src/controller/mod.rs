//! Controller module for ceph-deployment-operator.
//!
//! Contains the reconciliation loop, the phase state machine, error handling,
//! status management, validation and the convergence steps for every Rook
//! child kind.

// Shared modules
pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod status;

// Pass orchestration
pub mod lifecycle;
pub mod nodes;
pub mod phase;
pub mod reconciler;
pub mod setup;
pub mod subobjects;
pub mod validation;
pub mod version;

// Convergence
pub mod apply;
pub mod children;
pub mod cluster;
pub mod differ;
pub mod filesystems;
pub mod ingress;
pub mod multisite;
pub mod object_storage;
pub mod openstack;
pub mod pass;
pub mod storage_classes;
pub mod teardown;
