//! Cluster introspection.

pub mod kubernetes;
pub mod types;

use async_trait::async_trait;

use crate::error::TkupError;

pub use types::{ClusterSnapshot, Layer, NodeInfo, NodeRole};

/// Reads the current cluster topology and versions.
#[async_trait]
pub trait ClusterInspector: Send + Sync {
    /// Take a fresh point-in-time snapshot of the cluster.
    async fn snapshot(&self) -> Result<ClusterSnapshot, TkupError>;
}
