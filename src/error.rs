//! Custom error types for tkup.

use thiserror::Error;

use crate::cluster::Layer;

/// Errors that can occur during cluster upgrade operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TkupError {
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("{layer} version {version} is not yet released (available: {})", available.join(", "))]
    NotYetReleased {
        layer: Layer,
        version: String,
        available: Vec<String>,
    },

    #[error("No stable {0} versions found in release index")]
    NoStableVersions(Layer),

    #[error("Node not found in cluster snapshot: {0}")]
    NodeNotFound(String),

    #[error("Failed to initiate upgrade on node {node}: {details}")]
    UpgradeInitiationFailed { node: String, details: String },

    #[error("Upgrade failed on node {node}: {details}")]
    UpgradeFailed { node: String, details: String },

    #[error("Timeout waiting for {operation}: {details}")]
    Timeout { operation: String, details: String },

    #[error("{layer} upgrade did not converge, outstanding nodes: {}", outstanding.join(", "))]
    ConvergenceTimeout {
        layer: Layer,
        outstanding: Vec<String>,
    },

    #[error("[{component}] unavailable: {details}")]
    Unavailable { component: String, details: String },

    #[error("Prerequisites not met: {0}")]
    PrerequisitesNotMet(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TkupError {
    /// Create an `Unavailable` error from any displayable error.
    pub fn unavailable<E: std::fmt::Display>(component: &str, err: E) -> Self {
        TkupError::Unavailable {
            component: component.to_string(),
            details: err.to_string(),
        }
    }

    /// Returns true if a read that produced this error may succeed when retried.
    ///
    /// Upgrade invocations are never retried regardless of this value.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TkupError::Unavailable { .. }
                | TkupError::KubernetesApi(_)
                | TkupError::NoStableVersions(_)
                | TkupError::Timeout { .. }
        )
    }
}

impl From<kube::Error> for TkupError {
    fn from(err: kube::Error) -> Self {
        TkupError::KubernetesApi(err.to_string())
    }
}
