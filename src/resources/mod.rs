//! Resource generation module.
//!
//! Pure functions turning a CephDeployment spec into the child objects the
//! controller converges. Nothing here talks to the API server.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | CephCluster + `rook-config-override` | The Ceph cluster and its ceph.conf |
//! | CephBlockPool | RBD pools and builtin pool overrides |
//! | CephFilesystem | Shared filesystems |
//! | CephClient, CephRBDMirror, peer Secrets | Client users and RBD mirroring |
//! | CephObjectStore, realm/zone group/zone | Object storage and multisite |
//! | StorageClass | CSI classes for RBD pools and CephFS data pools |
//! | NetworkPolicy | Ingress rules for the Ceph daemons |
//! | Ingress, Service | Public access to the gateway |
//! | `openstack-ceph-keys` Secret | Keys and endpoints for OpenStack services |

pub mod ceph_config;
pub mod clients;
pub mod cluster;
pub mod common;
pub mod filesystems;
pub mod ingress;
pub mod network_policies;
pub mod object_storage;
pub mod openstack;
pub mod pools;
pub mod storage_classes;
