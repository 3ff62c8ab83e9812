//! Ingress in front of the object storage gateway.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};

use crate::crd::{IngressConfig, IngressTlsConfig};
use crate::resources::common::{child_meta, rgw_resource_name};
use crate::resources::object_storage::public_host;

/// Label marking ingresses managed for the gateway.
pub const INGRESS_LABEL: &str = "cephdeployment.lcm.mirantis.com/ingress";
const INGRESS_LABEL_VALUE: &str = "ceph-object-store-ingress";
const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
/// Ingress class used when none is configured; nginx defaults apply to it.
pub const DEFAULT_INGRESS_CLASS: &str = "openstack-ingress-nginx";

/// Selector matching every managed ingress.
pub fn managed_selector() -> String {
    format!("{INGRESS_LABEL}={INGRESS_LABEL_VALUE}")
}

/// `rook-ceph-rgw-<rgw>-ingress`
pub fn ingress_name(rgw: &str) -> String {
    rgw_resource_name(rgw, Some("ingress"))
}

/// TLS secret of the ingress: the referenced one or `rook-ceph-rgw-<host>-tls-public`.
pub fn tls_secret_name(rgw: &str, tls: &IngressTlsConfig) -> String {
    match tls.tls_secret_ref_name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => rgw_resource_name(
            tls.hostname.as_deref().filter(|h| !h.is_empty()).unwrap_or(rgw),
            Some("tls-public"),
        ),
    }
}

fn annotations(config: &IngressConfig, class: &str, host: &str) -> BTreeMap<String, String> {
    let mut annotations = config.annotations.clone();
    if class == DEFAULT_INGRESS_CLASS {
        for (key, value) in [
            ("nginx.ingress.kubernetes.io/proxy-body-size", "0"),
            ("nginx.ingress.kubernetes.io/rewrite-target", "/"),
        ] {
            annotations
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        annotations.insert(
            "nginx.ingress.kubernetes.io/upstream-vhost".to_string(),
            host.to_string(),
        );
    }
    annotations.insert(INGRESS_CLASS_ANNOTATION.to_string(), class.to_string());
    annotations
}

/// Ingress routing the public host to the gateway `http` port.
pub fn generate_ingress(
    rgw: &str,
    config: &IngressConfig,
    tls: &IngressTlsConfig,
    access_label: Option<(&str, &str)>,
    rook_namespace: &str,
) -> Ingress {
    let class = config
        .controller_class_name
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_INGRESS_CLASS);
    let host = public_host(rgw, tls);

    let mut labels = BTreeMap::from([
        ("ingress-type".to_string(), format!("{class}-rgw")),
        (INGRESS_LABEL.to_string(), INGRESS_LABEL_VALUE.to_string()),
        ("app".to_string(), "rook-ceph-rgw".to_string()),
        ("rook_object_store".to_string(), rgw.to_string()),
    ]);
    if let Some((key, value)) = access_label {
        labels.insert(key.to_string(), value.to_string());
    }
    let mut meta = child_meta(&ingress_name(rgw), rook_namespace);
    meta.labels = Some(labels);
    meta.annotations = Some(annotations(config, class, &host));

    let path = HTTPIngressPath {
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: rgw_resource_name(rgw, None),
                port: Some(ServiceBackendPort {
                    name: Some("http".to_string()),
                    number: None,
                }),
            }),
            resource: None,
        },
        path: Some("/".to_string()),
        path_type: "ImplementationSpecific".to_string(),
    };
    Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.clone()),
                http: Some(HTTPIngressRuleValue { paths: vec![path] }),
            }]),
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![host]),
                secret_name: Some(tls_secret_name(rgw, tls)),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}
