//! Kubernetes client for kubefn
//!
//! This crate provides the `Function` custom resource, the [`ClusterApi`]
//! seam the deploy and log engines talk through, and its kube-rs backed
//! implementation.

mod api;
mod client;
mod crd;
mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use api::{ClusterApi, LogStream};
pub use client::{ClusterConfig, KubeClient};
pub use crd::{
    ContainerTemplate, DESCRIPTION_ANNOTATION, EnvEntry, EventType, Function, FunctionSpec,
    MemoryResources,
};
pub use error::ClusterError;
#[cfg(any(test, feature = "mock"))]
pub use mock::{Call, MockCluster, MockFailure};

// Re-export types that are used in our public API
pub use kubefn_types::{ContainerInfo, PodObservation};
