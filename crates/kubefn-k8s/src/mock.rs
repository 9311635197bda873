//! In-memory cluster for exercising the engines without a live API server.
//!
//! Stores Functions like the API server would (create of an existing name
//! conflicts), replays a script of pod listings tick by tick, and records
//! every call so tests can assert on exactly which mutations were issued.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use parking_lot::Mutex;

use crate::api::{ClusterApi, LogStream};
use crate::crd::Function;
use crate::error::ClusterError;
use kubefn_types::PodObservation;

/// A recorded call against the mock
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    ListFunctions,
    CreateFunction(String),
    UpdateFunction(String),
    ListPods,
    PodLogs(String),
    StreamPodLogs(String),
    CreateIngress(String),
}

/// A failure the mock can be told to return
#[derive(Clone, Copy, Debug)]
pub enum MockFailure {
    Conflict,
    Timeout,
    Transport,
}

impl MockFailure {
    fn into_error(self, what: &str) -> ClusterError {
        match self {
            Self::Conflict => ClusterError::Conflict(what.to_string()),
            Self::Timeout => ClusterError::Timeout(what.to_string()),
            Self::Transport => ClusterError::Transport(what.to_string()),
        }
    }
}

#[derive(Default)]
struct MockState {
    functions: BTreeMap<(String, String), Function>,
    pod_script: VecDeque<Result<Vec<PodObservation>, MockFailure>>,
    last_pods: Vec<PodObservation>,
    logs: HashMap<String, String>,
    streams: HashMap<String, Vec<String>>,
    create_failures: HashMap<String, MockFailure>,
    update_failures: HashMap<String, MockFailure>,
    ingress_failures: HashMap<String, MockFailure>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a Function as if it had been created earlier
    pub fn insert_function(&self, namespace: &str, function: Function) {
        self.state
            .lock()
            .functions
            .insert((namespace.to_string(), function.name_any()), function);
    }

    pub fn function(&self, namespace: &str, name: &str) -> Option<Function> {
        self.state
            .lock()
            .functions
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Queue the result of the next `list_pods` call. Once the script runs
    /// out, the pods given to [`MockCluster::set_pods`] are returned.
    pub fn push_pods(&self, pods: Vec<PodObservation>) {
        self.state.lock().pod_script.push_back(Ok(pods));
    }

    pub fn push_pods_failure(&self, failure: MockFailure) {
        self.state.lock().pod_script.push_back(Err(failure));
    }

    /// Set the pods returned once the script is exhausted
    pub fn set_pods(&self, pods: Vec<PodObservation>) {
        self.state.lock().last_pods = pods;
    }

    pub fn set_pod_log(&self, pod: &str, text: &str) {
        self.state
            .lock()
            .logs
            .insert(pod.to_string(), text.to_string());
    }

    /// Chunks delivered by a followed pod stream before it closes
    pub fn set_pod_stream(&self, pod: &str, chunks: &[&str]) {
        self.state.lock().streams.insert(
            pod.to_string(),
            chunks.iter().map(|c| c.to_string()).collect(),
        );
    }

    pub fn fail_create(&self, function: &str, failure: MockFailure) {
        self.state
            .lock()
            .create_failures
            .insert(function.to_string(), failure);
    }

    pub fn fail_update(&self, function: &str, failure: MockFailure) {
        self.state
            .lock()
            .update_failures
            .insert(function.to_string(), failure);
    }

    pub fn fail_ingress(&self, ingress: &str, failure: MockFailure) {
        self.state
            .lock()
            .ingress_failures
            .insert(ingress.to_string(), failure);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Calls that change cluster state
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::CreateFunction(_) | Call::UpdateFunction(_) | Call::CreateIngress(_)
                )
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_functions(&self, namespace: &str) -> Result<Vec<Function>, ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::ListFunctions);
        Ok(state
            .functions
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, f)| f.clone())
            .collect())
    }

    async fn create_function(
        &self,
        namespace: &str,
        function: &Function,
    ) -> Result<(), ClusterError> {
        let name = function.name_any();
        let mut state = self.state.lock();
        state.calls.push(Call::CreateFunction(name.clone()));
        if let Some(failure) = state.create_failures.get(&name) {
            return Err(failure.into_error(&name));
        }
        let key = (namespace.to_string(), name.clone());
        if state.functions.contains_key(&key) {
            return Err(ClusterError::Conflict(format!("functions \"{}\"", name)));
        }
        state.functions.insert(key, function.clone());
        Ok(())
    }

    async fn update_function(
        &self,
        namespace: &str,
        name: &str,
        function: &Function,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::UpdateFunction(name.to_string()));
        if let Some(failure) = state.update_failures.get(name) {
            return Err(failure.into_error(name));
        }
        state
            .functions
            .insert((namespace.to_string(), name.to_string()), function.clone());
        Ok(())
    }

    async fn list_pods(&self, _namespace: &str) -> Result<Vec<PodObservation>, ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::ListPods);
        match state.pod_script.pop_front() {
            Some(Ok(pods)) => Ok(pods),
            Some(Err(failure)) => Err(failure.into_error("list pods")),
            None => Ok(state.last_pods.clone()),
        }
    }

    async fn pod_logs(&self, _namespace: &str, pod: &str) -> Result<String, ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::PodLogs(pod.to_string()));
        Ok(state.logs.get(pod).cloned().unwrap_or_default())
    }

    async fn stream_pod_logs(&self, _namespace: &str, pod: &str) -> Result<LogStream, ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::StreamPodLogs(pod.to_string()));
        let chunks = state.streams.get(pod).cloned().unwrap_or_default();
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn create_ingress(&self, _namespace: &str, ingress: &Ingress) -> Result<(), ClusterError> {
        let name = ingress.name_any();
        let mut state = self.state.lock();
        state.calls.push(Call::CreateIngress(name.clone()));
        match state.ingress_failures.get(&name) {
            Some(failure) => Err(failure.into_error(&name)),
            None => Ok(()),
        }
    }
}
