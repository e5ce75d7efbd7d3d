//! Error types for the controller.
//!
//! Classifies failures so the reconcile loop can decide between failing
//! the cluster, retrying with backoff, or requeueing while the topology
//! converges.

use std::time::Duration;
use thiserror::Error;

use crate::client::WireError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error in the declared spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// A redis/sentinel command failed
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Topology has not converged yet; requeue and re-check
    #[error("need requeue: {0}")]
    NotConverged(String),

    /// An invariant only a human may restore
    #[error("{0}")]
    FatalInvariant(String),

    /// A bounded wait ran out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Whether the topology is mid-convergence rather than broken
    pub fn is_not_converged(&self) -> bool {
        matches!(self, Error::NotConverged(_))
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Wire(_) | Error::NotConverged(_) | Error::Timeout(_) => true,
            Error::Validation(_) | Error::FatalInvariant(_) | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            // Non-retryable errors wait for the next spec edit; the long
            // requeue is only a safety net.
            Duration::from_secs(3600)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
