//! Readiness tracking for a freshly submitted function.
//!
//! [`RolloutTracker`] is the state machine: it is fed one pod listing per
//! tick and decides whether the rollout is still in progress, stable, given
//! up, or failed. [`wait_for_rollout`] drives it from a fixed interval timer
//! that lives exactly as long as the rollout is polling.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use kubefn_k8s::{ClusterApi, ClusterError};
use kubefn_types::PodObservation;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

/// Time between pod listings
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Empty listings tolerated before giving up
pub const MAX_EMPTY_TICKS: u32 = 3;

/// Restarts beyond this mark the rollout as failed
pub const MAX_RESTARTS: i32 = 2;

/// Consecutive fully-ready ticks required before declaring the rollout stable
pub const REQUIRED_STABLE_TICKS: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RolloutState {
    Polling,
    /// All pods ready on consecutive ticks
    Stable,
    /// No pods showed up within the retry budget
    GivenUp,
    /// A pod's container kept restarting
    Failed { pod: String, restarts: i32 },
}

impl RolloutState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Polling)
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling => write!(f, "polling"),
            Self::Stable => write!(f, "running"),
            Self::GivenUp => write!(f, "gave up waiting for pods"),
            Self::Failed { pod, restarts } => {
                write!(f, "failed: pod {} restarted {} times", pod, restarts)
            }
        }
    }
}

/// Per-function rollout state machine
#[derive(Debug)]
pub struct RolloutTracker {
    function: String,
    /// Pods created before this instant belong to an earlier deployment
    since: DateTime<Utc>,
    empty_ticks: u32,
    stable_ticks: u32,
    state: RolloutState,
}

impl RolloutTracker {
    pub fn new(function: &str, submitted_at: DateTime<Utc>) -> Self {
        Self {
            function: function.to_string(),
            // Pod creation timestamps have whole-second resolution
            since: submitted_at.trunc_subsecs(0),
            empty_ticks: 0,
            stable_ticks: 0,
            state: RolloutState::Polling,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn state(&self) -> &RolloutState {
        &self.state
    }

    /// Feed one pod listing and return the resulting state.
    ///
    /// Once terminal, further observations are ignored.
    pub fn observe(&mut self, pods: &[PodObservation]) -> &RolloutState {
        if self.state.is_terminal() {
            return &self.state;
        }

        let current: Vec<&PodObservation> = pods
            .iter()
            .filter(|p| p.belongs_to(&self.function))
            .filter(|p| p.created_at.is_some_and(|t| t >= self.since))
            .collect();

        if current.is_empty() {
            self.empty_ticks += 1;
            debug!(function = %self.function, attempt = self.empty_ticks, "no pods yet");
            if self.empty_ticks > MAX_EMPTY_TICKS {
                self.state = RolloutState::GivenUp;
            }
            return &self.state;
        }

        let mut ready = 0;
        for pod in &current {
            if pod.restart_count() > MAX_RESTARTS {
                self.state = RolloutState::Failed {
                    pod: pod.name.clone(),
                    restarts: pod.restart_count(),
                };
                return &self.state;
            }
            if pod.is_ready() {
                ready += 1;
            }
        }

        if ready == current.len() {
            self.stable_ticks += 1;
            if self.stable_ticks >= REQUIRED_STABLE_TICKS {
                self.state = RolloutState::Stable;
            }
        } else {
            self.stable_ticks = 0;
        }
        debug!(
            function = %self.function,
            ready,
            total = current.len(),
            stable_ticks = self.stable_ticks,
            "rollout progress"
        );

        &self.state
    }
}

/// Poll pods every `period` until the tracker reaches a terminal state.
///
/// Timeouts while listing pods are retried on the next tick and do not count
/// as empty listings; any other listing error ends the watch.
pub async fn wait_for_rollout<C: ClusterApi + ?Sized>(
    client: &C,
    namespace: &str,
    mut tracker: RolloutTracker,
    period: Duration,
) -> Result<RolloutState, ClusterError> {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let pods = match client.list_pods(namespace).await {
            Ok(pods) => pods,
            Err(e) if e.is_timeout() => {
                warn!(function = tracker.function(), error = %e, "timed out listing pods, retrying");
                continue;
            }
            Err(e) => {
                error!(function = tracker.function(), error = %e, "failed to list pods");
                return Err(e);
            }
        };

        let state = tracker.observe(&pods).clone();
        match &state {
            RolloutState::Polling => continue,
            RolloutState::Stable => {
                info!(function = tracker.function(), "function successfully deployed");
            }
            RolloutState::GivenUp => {
                warn!(
                    function = tracker.function(),
                    "unable to find pods for the function, giving up"
                );
            }
            RolloutState::Failed { pod, restarts } => {
                error!(
                    function = tracker.function(),
                    pod = %pod,
                    restarts,
                    "function failed to start"
                );
            }
        }
        return Ok(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use kubefn_k8s::{Call, MockCluster, MockFailure};
    use kubefn_types::ContainerInfo;

    fn submitted() -> DateTime<Utc> {
        Utc::now() - ChronoDuration::minutes(1)
    }

    fn pod(name: &str, function: &str, ready: bool, restarts: i32) -> PodObservation {
        let mut pod = PodObservation::new(name.to_string(), "default".to_string());
        pod.function = Some(function.to_string());
        pod.created_at = Some(Utc::now());
        let mut container = ContainerInfo::new(function.to_string());
        container.ready = ready;
        container.restart_count = restarts;
        pod.containers = vec![container];
        pod
    }

    #[test]
    fn test_stable_on_second_ready_tick() {
        let mut tracker = RolloutTracker::new("hello", submitted());
        let pods = vec![pod("hello-1", "hello", true, 0), pod("hello-2", "hello", true, 0)];

        assert_eq!(tracker.observe(&pods), &RolloutState::Polling);
        assert_eq!(tracker.observe(&pods), &RolloutState::Stable);
    }

    #[test]
    fn test_not_ready_tick_resets_stability() {
        let mut tracker = RolloutTracker::new("hello", submitted());
        let ready = vec![pod("hello-1", "hello", true, 0)];
        let not_ready = vec![pod("hello-1", "hello", false, 0)];

        tracker.observe(&ready);
        tracker.observe(&not_ready);
        assert_eq!(tracker.observe(&ready), &RolloutState::Polling);
        assert_eq!(tracker.observe(&ready), &RolloutState::Stable);
    }

    #[test]
    fn test_gives_up_after_four_empty_ticks() {
        let mut tracker = RolloutTracker::new("hello", submitted());
        for _ in 0..3 {
            assert_eq!(tracker.observe(&[]), &RolloutState::Polling);
        }
        assert_eq!(tracker.observe(&[]), &RolloutState::GivenUp);
    }

    #[test]
    fn test_restart_threshold_fails_immediately() {
        let mut tracker = RolloutTracker::new("hello", submitted());
        let pods = vec![pod("hello-1", "hello", true, 0), pod("hello-2", "hello", true, 3)];
        assert_eq!(
            tracker.observe(&pods),
            &RolloutState::Failed {
                pod: "hello-2".to_string(),
                restarts: 3
            }
        );
        // terminal states stick
        assert!(matches!(
            tracker.observe(&[pod("hello-1", "hello", true, 0)]),
            RolloutState::Failed { .. }
        ));
    }

    #[test]
    fn test_ignores_other_functions_and_stale_pods() {
        let mut tracker = RolloutTracker::new("hello", Utc::now());
        let mut stale = pod("hello-old", "hello", true, 5);
        stale.created_at = Some(Utc::now() - ChronoDuration::hours(1));
        let other = pod("bye-1", "bye", true, 5);

        for _ in 0..4 {
            tracker.observe(&[stale.clone(), other.clone()]);
        }
        assert_eq!(tracker.state(), &RolloutState::GivenUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reaches_stable() {
        let cluster = MockCluster::new();
        cluster.push_pods(vec![pod("hello-1", "hello", false, 0)]);
        cluster.set_pods(vec![pod("hello-1", "hello", true, 0)]);

        let tracker = RolloutTracker::new("hello", submitted());
        let state = wait_for_rollout(&cluster, "default", tracker, POLL_INTERVAL)
            .await
            .unwrap();

        assert_eq!(state, RolloutState::Stable);
        assert_eq!(cluster.count(&Call::ListPods), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_do_not_use_empty_budget() {
        let cluster = MockCluster::new();
        for _ in 0..5 {
            cluster.push_pods_failure(MockFailure::Timeout);
        }
        cluster.set_pods(vec![pod("hello-1", "hello", true, 0)]);

        let tracker = RolloutTracker::new("hello", submitted());
        let state = wait_for_rollout(&cluster, "default", tracker, POLL_INTERVAL)
            .await
            .unwrap();
        assert_eq!(state, RolloutState::Stable);
        assert_eq!(cluster.count(&Call::ListPods), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_ends_watch() {
        let cluster = MockCluster::new();
        cluster.push_pods_failure(MockFailure::Transport);

        let tracker = RolloutTracker::new("hello", submitted());
        let result = wait_for_rollout(&cluster, "default", tracker, POLL_INTERVAL).await;
        assert!(matches!(result, Err(ClusterError::Transport(_))));
    }
}
