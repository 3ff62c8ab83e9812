//! CephClient and RBD mirroring generation.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;

use crate::crd::{
    CephClient, CephClientResourceSpec, CephClientSpec, CephRBDMirror, CephRbdMirrorSpec,
    MirroringPeerSpec, RbdMirrorSpec,
};
use crate::resources::common::{RBD_MIRROR_SECRET_LABEL, child_meta, single};

pub fn generate_clients(clients: &[CephClientSpec], rook_namespace: &str) -> Vec<CephClient> {
    clients
        .iter()
        .map(|c| CephClient {
            metadata: child_meta(&c.name, rook_namespace),
            spec: CephClientResourceSpec {
                caps: c.caps.clone(),
            },
            status: None,
        })
        .collect()
}

/// `rbd-mirror-token-<site>-<pool>`
pub fn peer_secret_name(site: &str, pool: &str) -> String {
    format!("rbd-mirror-token-{site}-{pool}")
}

/// One bootstrap peer secret per (peer, pool).
pub fn generate_peer_secrets(mirror: &RbdMirrorSpec, rook_namespace: &str) -> Vec<Secret> {
    mirror
        .peers
        .iter()
        .flat_map(|peer| {
            peer.pools.iter().map(move |pool| {
                let mut meta = child_meta(&peer_secret_name(&peer.site, pool), rook_namespace);
                meta.labels = Some(single(RBD_MIRROR_SECRET_LABEL, "true"));
                Secret {
                    metadata: meta,
                    data: Some(BTreeMap::from([
                        ("pool".to_string(), ByteString(pool.as_bytes().to_vec())),
                        ("token".to_string(), ByteString(peer.token.as_bytes().to_vec())),
                    ])),
                    type_: Some("RBDPeer".to_string()),
                    ..Default::default()
                }
            })
        })
        .collect()
}

/// The CephRBDMirror, named after the deployment.
pub fn generate_rbd_mirror(name: &str, mirror: &RbdMirrorSpec, rook_namespace: &str) -> CephRBDMirror {
    let secret_names: Vec<String> = mirror
        .peers
        .iter()
        .flat_map(|peer| peer.pools.iter().map(|pool| peer_secret_name(&peer.site, pool)))
        .collect();
    CephRBDMirror {
        metadata: child_meta(name, rook_namespace),
        spec: CephRbdMirrorSpec {
            count: mirror.daemons_count,
            peers: (!secret_names.is_empty()).then_some(MirroringPeerSpec { secret_names }),
        },
        status: None,
    }
}
