//! Error types for deployments.
//!
//! Every per-function failure names its function so the aggregated batch
//! report reads as one line per function.

use kubefn_k8s::ClusterError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    /// A differing resource of the same name exists and no forced redeploy was requested
    #[error(
        "function '{function}' already exists with a different definition; redeploy with --force to replace it"
    )]
    AlreadyExists { function: String },

    /// Create or update of the Function resource failed
    #[error("failed to deploy function '{function}': {source}")]
    Submission {
        function: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to create ingress for function '{function}': {source}")]
    Ingress {
        function: String,
        #[source]
        source: ClusterError,
    },

    /// Pod listing failed with a non-timeout error while watching the rollout
    #[error("lost track of rollout for function '{function}': {source}")]
    Rollout {
        function: String,
        #[source]
        source: ClusterError,
    },

    #[error("rollout watcher for function '{function}' stopped unexpectedly: {reason}")]
    Aborted { function: String, reason: String },

    /// All errors recorded during one deploy batch
    #[error("{}", render_batch(.0))]
    Batch(Vec<DeployError>),
}

impl DeployError {
    /// Name of the function the error belongs to (`None` for a batch)
    pub fn function(&self) -> Option<&str> {
        match self {
            Self::AlreadyExists { function }
            | Self::Submission { function, .. }
            | Self::Ingress { function, .. }
            | Self::Rollout { function, .. }
            | Self::Aborted { function, .. } => Some(function),
            Self::Batch(_) => None,
        }
    }
}

fn render_batch(errors: &[DeployError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_renders_one_line_per_error() {
        let batch = DeployError::Batch(vec![
            DeployError::AlreadyExists {
                function: "hello".to_string(),
            },
            DeployError::Submission {
                function: "bye".to_string(),
                source: ClusterError::Transport("connection reset".to_string()),
            },
        ]);
        let report = batch.to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("'hello'"));
        assert!(lines[0].contains("--force"));
        assert!(lines[1].contains("connection reset"));
    }
}
