//! Deployment reconciliation.
//!
//! For every function the reconciler builds the desired `Function`, compares
//! it with what the cluster already stores and issues the smallest change:
//! create, forced update, or nothing. Successful submissions hand off to a
//! background rollout watcher; the batch itself does not wait for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use kube::ResourceExt;
use kubefn_k8s::{ClusterApi, Function};
use kubefn_types::FunctionDefinition;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::builder::{build_function, is_equivalent};
use crate::error::{DeployError, Result};
use crate::ingress::provision_ingress;
use crate::rollout::{POLL_INTERVAL, RolloutState, RolloutTracker, wait_for_rollout};

/// What happened to one function in a deploy batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeployOutcome {
    Created,
    /// Replaced a differing definition (forced redeploy)
    Updated,
    /// Stored definition already matches; nothing submitted
    Unchanged,
    /// Create raced with an existing object of the same name
    AlreadyDeployed,
}

/// Process-level result of the background rollouts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExitSignal {
    #[default]
    Success,
    Failure,
}

/// Background watch of one function's rollout
pub struct RolloutHandle {
    function: String,
    task: JoinHandle<Result<RolloutState>>,
}

impl RolloutHandle {
    pub fn function(&self) -> &str {
        &self.function
    }
}

/// Outcome of waiting for every rollout of a batch
#[derive(Debug, Default)]
pub struct RolloutSummary {
    pub exit: ExitSignal,
    pub states: Vec<(String, RolloutState)>,
    /// Ingress and watch errors recorded after submission
    pub errors: Vec<DeployError>,
}

impl RolloutSummary {
    pub fn is_success(&self) -> bool {
        self.exit == ExitSignal::Success && self.errors.is_empty()
    }
}

/// Result of one deploy batch
#[derive(Default)]
pub struct DeployReport {
    pub outcomes: Vec<(String, DeployOutcome)>,
    pub errors: Vec<DeployError>,
    rollouts: Vec<RolloutHandle>,
}

impl DeployReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn outcome(&self, function: &str) -> Option<DeployOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == function)
            .map(|(_, outcome)| *outcome)
    }

    pub fn rollouts(&self) -> &[RolloutHandle] {
        &self.rollouts
    }

    /// Aggregate the recorded errors into one failure.
    ///
    /// Rollouts started by the batch are left running.
    pub fn take_failure(&mut self) -> Option<DeployError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(DeployError::Batch(std::mem::take(&mut self.errors)))
        }
    }

    /// Wait for every background rollout and fold their results
    pub async fn wait_rollouts(self) -> RolloutSummary {
        let mut summary = RolloutSummary::default();
        for handle in self.rollouts {
            match handle.task.await {
                Ok(Ok(state)) => {
                    if matches!(state, RolloutState::Failed { .. }) {
                        summary.exit = ExitSignal::Failure;
                    }
                    summary.states.push((handle.function, state));
                }
                Ok(Err(e)) => summary.errors.push(e),
                Err(e) => summary.errors.push(DeployError::Aborted {
                    function: handle.function,
                    reason: e.to_string(),
                }),
            }
        }
        summary
    }
}

/// Reconciles function definitions against the cluster
pub struct Deployer<C: ClusterApi + 'static> {
    client: Arc<C>,
    default_namespace: String,
    /// Host of the API server, used to derive default ingress hostnames
    endpoint_host: String,
    force: bool,
    poll_interval: Duration,
}

impl<C: ClusterApi + 'static> Deployer<C> {
    pub fn new(client: Arc<C>, default_namespace: &str, endpoint_host: &str) -> Self {
        Self {
            client,
            default_namespace: default_namespace.to_string(),
            endpoint_host: endpoint_host.to_string(),
            force: false,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Replace existing functions whose definition differs
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Reconcile every function.
    ///
    /// Functions are reconciled concurrently; a failure in one never stops
    /// the others. The report lists what happened to each function and keeps
    /// the rollouts that were started.
    pub async fn deploy(&self, functions: &[FunctionDefinition]) -> DeployReport {
        let results = join_all(
            functions
                .iter()
                .map(|def| async move { (def.name.clone(), self.reconcile(def).await) }),
        )
        .await;

        let mut report = DeployReport::default();
        for (function, result) in results {
            match result {
                Ok((outcome, rollout)) => {
                    report.outcomes.push((function, outcome));
                    report.rollouts.extend(rollout);
                }
                Err(e) => report.errors.push(e),
            }
        }
        report
    }

    fn namespace_for<'a>(&'a self, def: &'a FunctionDefinition) -> &'a str {
        def.namespace.as_deref().unwrap_or(&self.default_namespace)
    }

    #[instrument(skip_all, fields(function = %def.name))]
    async fn reconcile(
        &self,
        def: &FunctionDefinition,
    ) -> Result<(DeployOutcome, Option<RolloutHandle>)> {
        let namespace = self.namespace_for(def);
        let mut desired = build_function(def, namespace);

        let existing = self
            .client
            .list_functions(namespace)
            .await
            .map_err(|source| DeployError::Submission {
                function: def.name.clone(),
                source,
            })?;

        match existing.into_iter().find(|f| f.name_any() == def.name) {
            None => self.create(def, namespace, &desired).await,
            Some(observed) if is_equivalent(&desired, &observed) => {
                info!("function has not changed, skipping deployment");
                Ok((DeployOutcome::Unchanged, None))
            }
            Some(_) if !self.force => {
                warn!("function already exists with a different definition");
                Err(DeployError::AlreadyExists {
                    function: def.name.clone(),
                })
            }
            Some(observed) => {
                desired.metadata.resource_version = observed.metadata.resource_version;
                self.update(def, namespace, &desired).await
            }
        }
    }

    async fn create(
        &self,
        def: &FunctionDefinition,
        namespace: &str,
        desired: &Function,
    ) -> Result<(DeployOutcome, Option<RolloutHandle>)> {
        let submitted_at = Utc::now();
        match self.client.create_function(namespace, desired).await {
            Ok(()) => {
                info!(namespace, event = %def.event, "deploying function");
                let rollout = self.spawn_rollout(def, namespace, submitted_at, true);
                Ok((DeployOutcome::Created, Some(rollout)))
            }
            Err(e) if e.is_conflict() => {
                info!("function is already deployed");
                Ok((DeployOutcome::AlreadyDeployed, None))
            }
            Err(source) => {
                error!(error = %source, "unable to deploy function");
                Err(DeployError::Submission {
                    function: def.name.clone(),
                    source,
                })
            }
        }
    }

    async fn update(
        &self,
        def: &FunctionDefinition,
        namespace: &str,
        desired: &Function,
    ) -> Result<(DeployOutcome, Option<RolloutHandle>)> {
        let submitted_at = Utc::now();
        match self
            .client
            .update_function(namespace, &def.name, desired)
            .await
        {
            Ok(()) => {
                info!(namespace, "redeploying function");
                // The ingress, if any, was provisioned by the original create
                let rollout = self.spawn_rollout(def, namespace, submitted_at, false);
                Ok((DeployOutcome::Updated, Some(rollout)))
            }
            Err(source) => {
                error!(error = %source, "unable to update function");
                Err(DeployError::Submission {
                    function: def.name.clone(),
                    source,
                })
            }
        }
    }

    fn spawn_rollout(
        &self,
        def: &FunctionDefinition,
        namespace: &str,
        submitted_at: chrono::DateTime<Utc>,
        expose: bool,
    ) -> RolloutHandle {
        let client = Arc::clone(&self.client);
        let tracker = RolloutTracker::new(&def.name, submitted_at);
        let function = def.name.clone();
        let event = def.event.clone();
        let namespace = namespace.to_string();
        let endpoint_host = self.endpoint_host.clone();
        let period = self.poll_interval;

        let task = tokio::spawn(async move {
            let state = wait_for_rollout(client.as_ref(), &namespace, tracker, period)
                .await
                .map_err(|source| DeployError::Rollout {
                    function: function.clone(),
                    source,
                })?;

            if expose && state == RolloutState::Stable {
                provision_ingress(client.as_ref(), &namespace, &function, &event, &endpoint_host)
                    .await?;
            }
            Ok(state)
        });

        RolloutHandle {
            function: def.name.clone(),
            task,
        }
    }
}
