//! Function Custom Resource Definition.
//!
//! The function controller running in the cluster watches these objects and
//! turns each one into a deployment, a service and (for PubSub functions) a
//! topic consumer. Only the spec payload takes part in change detection.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation carrying the human-readable function description
pub const DESCRIPTION_ANNOTATION: &str = "kubeless.serverless.com/description";

/// Function is a custom resource holding a function's source and runtime.
///
/// Example:
/// ```yaml
/// apiVersion: k8s.io/v1
/// kind: Function
/// metadata:
///   name: hello
/// spec:
///   handler: handler.hello
///   runtime: python2.7
///   function: |
///     def hello():
///         return "hello world"
///   type: HTTP
/// ```
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.io",
    version = "v1",
    kind = "Function",
    plural = "functions",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// `module.entrypoint`
    pub handler: String,

    pub runtime: String,

    /// Function source text
    pub function: String,

    /// Dependency manifest text (requirements.txt, package.json, ...)
    #[serde(default)]
    pub deps: String,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Topic consumed by PubSub functions
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,

    /// Container overrides, present only when env or memory is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ContainerTemplate>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum EventType {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "PubSub")]
    PubSub,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ContainerTemplate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<MemoryResources>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct MemoryResources {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,

    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}
