use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::networking::v1::Ingress;

use crate::crd::Function;
use crate::error::ClusterError;
use kubefn_types::PodObservation;

/// Chunks of log text from a followed pod, ending when the pod's stream closes
pub type LogStream = BoxStream<'static, Result<String, ClusterError>>;

/// The cluster operations the deploy and log engines rely on
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List the Function resources stored in a namespace
    async fn list_functions(&self, namespace: &str) -> Result<Vec<Function>, ClusterError>;

    /// Create a Function; an existing object of that name yields [`ClusterError::Conflict`]
    async fn create_function(&self, namespace: &str, function: &Function)
    -> Result<(), ClusterError>;

    /// Replace an existing Function. The document must carry the stored resource version.
    async fn update_function(
        &self,
        namespace: &str,
        name: &str,
        function: &Function,
    ) -> Result<(), ClusterError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodObservation>, ClusterError>;

    /// Full log text of a pod's container
    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, ClusterError>;

    /// Follow a pod's log
    async fn stream_pod_logs(&self, namespace: &str, pod: &str) -> Result<LogStream, ClusterError>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), ClusterError>;
}
