use std::sync::Arc;

use futures::StreamExt;
use kubefn_k8s::{ClusterApi, ClusterError};
use kubefn_types::{LogFilterOptions, PodObservation};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::filter::LogFilter;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("unable to find any pod for function '{0}'")]
    PodNotFound(String),

    #[error("invalid log filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Filtered log text from one pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogChunk {
    pub pod: String,
    pub text: String,
}

/// Finds the pods behind a function and reads their logs
pub struct LogFetcher<C: ClusterApi + 'static> {
    client: Arc<C>,
    namespace: String,
}

impl<C: ClusterApi + 'static> LogFetcher<C> {
    pub fn new(client: Arc<C>, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// Pods carrying the function's label
    pub async fn locate(&self, function: &str) -> Result<Vec<PodObservation>, LogError> {
        let pods: Vec<PodObservation> = self
            .client
            .list_pods(&self.namespace)
            .await?
            .into_iter()
            .filter(|p| p.belongs_to(function))
            .collect();

        if pods.is_empty() {
            return Err(LogError::PodNotFound(function.to_string()));
        }
        debug!(function, pods = pods.len(), "located function pods");
        Ok(pods)
    }

    /// Fetch and filter the full log of every pod backing a function.
    ///
    /// Each pod's filtered log is echoed unless `options.silent` is set; the
    /// first pod's filtered text is returned.
    pub async fn fetch(&self, function: &str, options: &LogFilterOptions) -> Result<String, LogError> {
        let filter = LogFilter::new(options)?;
        let pods = self.locate(function).await?;

        let mut first = None;
        for pod in &pods {
            let raw = self.client.pod_logs(&self.namespace, &pod.name).await?;
            let text = filter.apply(&raw);
            if !options.silent {
                println!("{}", text);
            }
            first.get_or_insert(text);
        }
        Ok(first.unwrap_or_default())
    }

    /// Follow the logs of every pod backing a function.
    ///
    /// Each chunk received is trimmed and filtered on its own, then sent on
    /// `log_tx`. Streams run until they close or the returned follower is
    /// stopped.
    pub async fn follow(
        &self,
        function: &str,
        options: &LogFilterOptions,
        log_tx: mpsc::UnboundedSender<LogChunk>,
    ) -> Result<LogFollower, LogError> {
        let filter = LogFilter::new(options)?;
        let pods = self.locate(function).await?;

        let mut follower = LogFollower::new();
        for pod in pods {
            let task = follower.spawn_pod_stream(
                Arc::clone(&self.client),
                self.namespace.clone(),
                pod.name,
                filter.clone(),
                log_tx.clone(),
            );
            follower.tasks.push(task);
        }
        Ok(follower)
    }
}

/// Manages log streaming from multiple pods
pub struct LogFollower {
    /// Cancellation token for stopping streams
    cancel: CancellationToken,

    /// Active stream task handles
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl LogFollower {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    fn spawn_pod_stream<C: ClusterApi + 'static>(
        &self,
        client: Arc<C>,
        namespace: String,
        pod: String,
        filter: LogFilter,
        log_tx: mpsc::UnboundedSender<LogChunk>,
    ) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut stream = match client.stream_pod_logs(&namespace, &pod).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(pod = %pod, error = %e, "failed to open log stream");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    next = stream.next() => {
                        match next {
                            Some(Ok(chunk)) => {
                                let text = filter.apply(chunk.trim());
                                if text.is_empty() {
                                    continue;
                                }
                                if log_tx.send(LogChunk { pod: pod.clone(), text }).is_err() {
                                    // Receiver gone, stop streaming
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(pod = %pod, error = %e, "log stream failed");
                                break;
                            }
                            // Stream ended (pod terminated?)
                            None => break,
                        }
                    }
                }
            }
        })
    }

    /// Stop all streams
    pub fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Wait until every stream has ended
    pub async fn wait(mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// Get the number of active streams
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for LogFollower {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefn_k8s::{Call, ContainerInfo, MockCluster};

    fn pod(name: &str, function: &str) -> PodObservation {
        let mut pod = PodObservation::new(name.to_string(), "default".to_string());
        pod.function = Some(function.to_string());
        pod.containers = vec![ContainerInfo::new(function.to_string())];
        pod
    }

    fn silent() -> LogFilterOptions {
        LogFilterOptions {
            silent: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_pod() {
        let cluster = Arc::new(MockCluster::new());
        cluster.set_pods(vec![pod("bye-1", "bye")]);
        let fetcher = LogFetcher::new(cluster, "default");

        let err = fetcher.fetch("hello", &silent()).await.unwrap_err();
        assert!(matches!(err, LogError::PodNotFound(ref f) if f == "hello"));
    }

    #[tokio::test]
    async fn test_fetch_returns_first_pod_filtered() {
        let cluster = Arc::new(MockCluster::new());
        cluster.set_pods(vec![pod("hello-1", "hello"), pod("hello-2", "hello")]);
        cluster.set_pod_log("hello-1", "a\nb\n\nc\n");
        cluster.set_pod_log("hello-2", "x\ny\n");
        let fetcher = LogFetcher::new(Arc::clone(&cluster), "default");

        let options = LogFilterOptions {
            count: Some(2),
            ..silent()
        };
        let text = fetcher.fetch("hello", &options).await.unwrap();

        assert_eq!(text, "b\nc");
        assert_eq!(cluster.count(&Call::PodLogs("hello-1".to_string())), 1);
        assert_eq!(cluster.count(&Call::PodLogs("hello-2".to_string())), 1);
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_before_cluster_calls() {
        let cluster = Arc::new(MockCluster::new());
        let fetcher = LogFetcher::new(Arc::clone(&cluster), "default");
        let options = LogFilterOptions {
            pattern: Some("[".to_string()),
            ..silent()
        };

        let err = fetcher.fetch("hello", &options).await.unwrap_err();
        assert!(matches!(err, LogError::InvalidPattern(_)));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_follow_filters_each_chunk() {
        let cluster = Arc::new(MockCluster::new());
        cluster.set_pods(vec![pod("hello-1", "hello")]);
        cluster.set_pod_stream(
            "hello-1",
            &["ERROR boom\n", "INFO fine", "  ERROR again  ", "ERROR a\nERROR b"],
        );
        let fetcher = LogFetcher::new(Arc::clone(&cluster), "default");

        let options = LogFilterOptions {
            count: Some(1),
            pattern: Some("ERROR".to_string()),
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let follower = fetcher.follow("hello", &options, tx).await.unwrap();
        follower.wait().await;

        let mut received = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            received.push(chunk.text);
        }
        assert_eq!(received, vec!["ERROR boom", "ERROR again", "ERROR b"]);
    }

    #[tokio::test]
    async fn test_follow_without_pods() {
        let cluster = Arc::new(MockCluster::new());
        let fetcher = LogFetcher::new(cluster, "default");
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = fetcher.follow("hello", &LogFilterOptions::default(), tx).await;
        assert!(matches!(result, Err(LogError::PodNotFound(_))));
    }
}
