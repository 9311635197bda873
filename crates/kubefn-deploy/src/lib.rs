//! Function deployment for kubefn
//!
//! This crate builds Function and Ingress resources, reconciles them against
//! the cluster, and watches rollouts until they settle.

pub mod builder;
pub mod error;
pub mod ingress;
pub mod reconciler;
pub mod rollout;

pub use builder::{build_function, is_equivalent, normalize_memory};
pub use error::DeployError;
pub use ingress::{IngressRule, ingress_rule_for, provision_ingress};
pub use reconciler::{
    DeployOutcome, DeployReport, Deployer, ExitSignal, RolloutHandle, RolloutSummary,
};
pub use rollout::{RolloutState, RolloutTracker, wait_for_rollout};
