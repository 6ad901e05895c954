//! Node-level upgrade collaborators.

pub mod talosctl;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TkupError;

/// Upgrades the Talos Linux installation of a single node.
#[async_trait]
pub trait NodeUpgrader: Send + Sync {
    /// Start the upgrade to `image_ref`. Returns once the node accepted it.
    async fn upgrade(&self, endpoint: &str, image_ref: &str) -> Result<(), TkupError>;

    /// Wait until the node answers again after its reboot.
    async fn await_healthy(&self, endpoint: &str, timeout: Duration) -> Result<(), TkupError>;
}

/// Upgrades the Kubernetes components through one node.
#[async_trait]
pub trait WorkloadUpgrader: Send + Sync {
    async fn upgrade(&self, endpoint: &str, current: &str, target: &str) -> Result<(), TkupError>;
}
