//! Custom Resource Definitions (CRDs) for ceph-deployment-operator.
//!
//! - `CephDeployment`: the desired Ceph cluster, owned by this operator
//! - LCM companions: health, secret, maintenance and OSD remove tasks
//! - Rook children: the `ceph.rook.io/v1` kinds the operator converges

mod ceph_deployment;
mod lcm;
mod rook;

pub use ceph_deployment::*;
pub use lcm::*;
pub use rook::*;
