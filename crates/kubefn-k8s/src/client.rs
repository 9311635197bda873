//! Kubernetes client for kubefn

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::Ingress;
use kube::Api;
use kube::api::{ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::debug;

use crate::api::{ClusterApi, LogStream};
use crate::crd::Function;
use crate::error::ClusterError;
use kubefn_types::{ContainerInfo, FUNCTION_LABEL, PodObservation};

/// Connection details resolved from the kubeconfig
#[derive(Clone)]
pub struct ClusterConfig {
    /// Context the config was built for (`None` = kubeconfig's current context)
    pub context: Option<String>,

    /// Namespace used when a function does not name one
    pub default_namespace: String,

    /// Host part of the API server URL
    pub endpoint_host: String,

    config: kube::Config,
}

impl ClusterConfig {
    /// Load the kubeconfig and resolve the given (or current) context
    pub async fn load(context: Option<&str>) -> Result<Self> {
        let kubeconfig =
            Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")?;

        if let Some(name) = context {
            if !Self::has_context(&kubeconfig, name) {
                anyhow::bail!("Context '{}' not found in kubeconfig", name);
            }
        }

        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: context.map(str::to_string),
                ..Default::default()
            },
        )
        .await
        .context(format!(
            "Failed to create config for context: {}",
            context.unwrap_or("<current>")
        ))?;

        let endpoint_host = config.cluster_url.host().unwrap_or("localhost").to_string();

        Ok(Self {
            context: context.map(str::to_string),
            default_namespace: config.default_namespace.clone(),
            endpoint_host,
            config,
        })
    }

    /// Whether the kubeconfig defines a context with this name
    pub fn has_context(kubeconfig: &Kubeconfig, name: &str) -> bool {
        kubeconfig.contexts.iter().any(|ctx| ctx.name == name)
    }
}

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let client = kube::Client::try_from(config.config.clone()).context(format!(
            "Failed to create client for context: {}",
            config.context.as_deref().unwrap_or("<current>")
        ))?;
        Ok(Self { client })
    }

    fn functions(&self, namespace: &str) -> Api<Function> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Log request parameters; every line is prefixed with its RFC 3339 timestamp
    fn log_params(follow: bool) -> LogParams {
        LogParams {
            follow,
            timestamps: true,
            ..Default::default()
        }
    }

    /// Convert a k8s Pod to the fields the poller and log locator care about
    fn pod_to_observation(pod: Pod, namespace: &str) -> PodObservation {
        let name = pod.metadata.name.unwrap_or_default();
        let mut observation = PodObservation::new(name, namespace.to_string());

        observation.created_at = pod.metadata.creation_timestamp.map(|t| t.0);
        observation.function = pod
            .metadata
            .labels
            .and_then(|mut labels| labels.remove(FUNCTION_LABEL));

        if let Some(container_statuses) = pod.status.and_then(|s| s.container_statuses) {
            observation.containers = container_statuses
                .into_iter()
                .map(|cs| {
                    let mut container = ContainerInfo::new(cs.name);
                    container.ready = cs.ready;
                    container.restart_count = cs.restart_count;
                    container
                })
                .collect();
        }

        observation
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn list_functions(&self, namespace: &str) -> Result<Vec<Function>, ClusterError> {
        let list = self.functions(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_function(
        &self,
        namespace: &str,
        function: &Function,
    ) -> Result<(), ClusterError> {
        self.functions(namespace)
            .create(&PostParams::default(), function)
            .await?;
        Ok(())
    }

    async fn update_function(
        &self,
        namespace: &str,
        name: &str,
        function: &Function,
    ) -> Result<(), ClusterError> {
        self.functions(namespace)
            .replace(name, &PostParams::default(), function)
            .await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodObservation>, ClusterError> {
        let list = self.pods(namespace).list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|pod| Self::pod_to_observation(pod, namespace))
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, ClusterError> {
        debug!(pod, namespace, "fetching pod log");
        Ok(self.pods(namespace).logs(pod, &Self::log_params(false)).await?)
    }

    async fn stream_pod_logs(&self, namespace: &str, pod: &str) -> Result<LogStream, ClusterError> {
        debug!(pod, namespace, "following pod log");
        let reader = self
            .pods(namespace)
            .log_stream(pod, &Self::log_params(true))
            .await?;
        Ok(reader
            .lines()
            .map_err(|e| ClusterError::Transport(e.to_string()))
            .boxed())
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), ClusterError> {
        let ingresses: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        ingresses.create(&PostParams::default(), ingress).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: minikube
clusters:
  - name: minikube
    cluster:
      server: https://192.168.99.100:8443
contexts:
  - name: minikube
    context:
      cluster: minikube
      user: minikube
      namespace: functions
users:
  - name: minikube
    user: {}
"#;

    #[test]
    fn test_has_context() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        assert!(ClusterConfig::has_context(&kubeconfig, "minikube"));
        assert!(!ClusterConfig::has_context(&kubeconfig, "production"));
    }

    #[test]
    fn test_log_params_request_timestamps() {
        let params = KubeClient::log_params(false);
        assert!(params.timestamps);
        assert!(!params.follow);

        let params = KubeClient::log_params(true);
        assert!(params.timestamps);
        assert!(params.follow);
    }
}
