//! Error types for cluster calls.
//!
//! Classifies kube errors into the three outcomes callers branch on:
//! conflicts, timeouts, and everything else.

use std::error::Error as _;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    /// The object already exists (HTTP 409)
    #[error("already exists: {0}")]
    Conflict(String),

    /// The request timed out; worth retrying on the next attempt
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// Transport failure outside the API client, e.g. a broken log stream
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    /// Classify a kube error
    pub fn from_kube(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 408 || resp.code == 504 => {
                Self::Timeout(resp.message.clone())
            }
            _ if is_timeout(&err) => Self::Timeout(err.to_string()),
            _ => Self::Kube(err),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        Self::from_kube(err)
    }
}

/// Walk the source chain looking for a timed-out io error or a timeout message
fn is_timeout(err: &kube::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = err.source();
    if err.to_string().to_lowercase().contains("timed out") {
        return true;
    }
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        let message = e.to_string().to_lowercase();
        if message.contains("timed out") || message.contains("deadline has elapsed") {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_conflict_classification() {
        assert!(ClusterError::from_kube(api_error(409)).is_conflict());
    }

    #[test]
    fn test_timeout_classification() {
        assert!(ClusterError::from_kube(api_error(504)).is_timeout());
        assert!(ClusterError::from_kube(api_error(408)).is_timeout());
    }

    #[test]
    fn test_other_api_errors_pass_through() {
        let err = ClusterError::from_kube(api_error(500));
        assert!(matches!(err, ClusterError::Kube(_)));
        assert!(!err.is_timeout());
    }
}
