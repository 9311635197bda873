//! Ingress generation and provisioning for HTTP functions.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule as K8sIngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubefn_k8s::ClusterApi;
use kubefn_types::EventSource;
use tracing::{error, info};

use crate::error::{DeployError, Result};

/// Port the function controller exposes each function's service on
pub const FUNCTION_PORT: i32 = 8080;

/// Wildcard DNS suffix used when no hostname is given
pub const DEFAULT_HOST_SUFFIX: &str = "nip.io";

/// Routing rule exposing one function at a path/hostname
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressRule {
    pub name: String,
    pub function: String,
    pub port: i32,
    pub path: String,
    pub hostname: String,
}

impl IngressRule {
    pub fn new(function: &str, path: &str, hostname: &str) -> Self {
        Self {
            name: format!("ingress-{}", function),
            function: function.to_string(),
            port: FUNCTION_PORT,
            path: normalize_path(path),
            hostname: hostname.to_string(),
        }
    }

    /// Generate the nginx-class Ingress for this rule
    pub fn to_ingress(&self, namespace: &str) -> Ingress {
        let annotations = BTreeMap::from([
            ("kubernetes.io/ingress.class".to_string(), "nginx".to_string()),
            (
                "nginx.ingress.kubernetes.io/rewrite-target".to_string(),
                "/".to_string(),
            ),
        ]);

        Ingress {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(namespace.to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![K8sIngressRule {
                    host: Some(self.hostname.clone()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some(self.path.clone()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: self.function.clone(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(self.port),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// `<cluster host>.nip.io`
pub fn default_hostname(endpoint_host: &str) -> String {
    format!("{}.{}", endpoint_host, DEFAULT_HOST_SUFFIX)
}

/// Decide whether an event needs a routing rule.
///
/// Only HTTP events with a non-root path or an explicit hostname get one.
pub fn ingress_rule_for(
    function: &str,
    event: &EventSource,
    endpoint_host: &str,
) -> Option<IngressRule> {
    let EventSource::Http { path, hostname } = event else {
        return None;
    };

    let path = path.as_deref().map(normalize_path);
    let is_root = path.as_deref().is_none_or(|p| p == "/");
    if is_root && hostname.is_none() {
        return None;
    }

    let hostname = hostname
        .clone()
        .unwrap_or_else(|| default_hostname(endpoint_host));
    Some(IngressRule::new(
        function,
        path.as_deref().unwrap_or("/"),
        &hostname,
    ))
}

/// Create the ingress for a function if its event calls for one.
///
/// Returns the created rule, or `None` when no rule was needed.
pub async fn provision_ingress<C: ClusterApi + ?Sized>(
    client: &C,
    namespace: &str,
    function: &str,
    event: &EventSource,
    endpoint_host: &str,
) -> Result<Option<IngressRule>> {
    let Some(rule) = ingress_rule_for(function, event, endpoint_host) else {
        return Ok(None);
    };

    match client
        .create_ingress(namespace, &rule.to_ingress(namespace))
        .await
    {
        Ok(()) => {
            info!(
                function,
                url = %format!("http://{}{}", rule.hostname, rule.path),
                "function exposed through ingress"
            );
            Ok(Some(rule))
        }
        Err(source) => {
            error!(function, error = %source, "failed to create ingress");
            Err(DeployError::Ingress {
                function: function.to_string(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(path: Option<&str>, hostname: Option<&str>) -> EventSource {
        EventSource::Http {
            path: path.map(str::to_string),
            hostname: hostname.map(str::to_string),
        }
    }

    #[test]
    fn test_root_path_needs_no_ingress() {
        assert!(ingress_rule_for("hello", &http(None, None), "10.0.0.1").is_none());
        assert!(ingress_rule_for("hello", &http(Some("/"), None), "10.0.0.1").is_none());
    }

    #[test]
    fn test_trigger_needs_no_ingress() {
        let event = EventSource::Trigger {
            topic: "orders".to_string(),
        };
        assert!(ingress_rule_for("hello", &event, "10.0.0.1").is_none());
    }

    #[test]
    fn test_custom_path_uses_default_hostname() {
        let rule = ingress_rule_for("hello", &http(Some("greet"), None), "10.0.0.1").unwrap();
        assert_eq!(rule.path, "/greet");
        assert_eq!(rule.hostname, "10.0.0.1.nip.io");
        assert_eq!(rule.name, "ingress-hello");
    }

    #[test]
    fn test_explicit_hostname_at_root() {
        let rule =
            ingress_rule_for("hello", &http(None, Some("fn.example.com")), "10.0.0.1").unwrap();
        assert_eq!(rule.path, "/");
        assert_eq!(rule.hostname, "fn.example.com");
    }

    #[test]
    fn test_ingress_document() {
        let ingress = IngressRule::new("hello", "/greet", "fn.example.com").to_ingress("default");
        let annotations = ingress.metadata.annotations.unwrap();
        assert_eq!(annotations["kubernetes.io/ingress.class"], "nginx");
        assert_eq!(annotations["nginx.ingress.kubernetes.io/rewrite-target"], "/");

        let rule = &ingress.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("fn.example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/greet"));
        let service = path.backend.service.as_ref().unwrap();
        assert_eq!(service.name, "hello");
        assert_eq!(service.port.as_ref().unwrap().number, Some(FUNCTION_PORT));
    }
}
