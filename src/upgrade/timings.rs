//! Delays and timeouts applied during a run.

use std::time::Duration;

use crate::wait::RetryPolicy;

const fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Every fixed wait of a run. Production values come from [`Timings::default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Bound on one upgrade invocation against a node.
    pub node_operation_timeout: Duration,
    /// Bound on a node coming back after a Talos upgrade reboot.
    pub health_timeout: Duration,
    /// Pause between two nodes of the same batch.
    pub inter_node_delay: Duration,
    /// Pause between the role groups of the Talos layer.
    pub talos_group_stabilization: Duration,
    /// Pause between the role groups of the Kubernetes layer.
    pub kubernetes_group_stabilization: Duration,
    /// Pause before the Kubernetes layer when Talos was upgraded.
    pub layer_stabilization: Duration,
    pub monitor_interval: Duration,
    pub monitor_timeout: Duration,
    pub snapshot_timeout: Duration,
    pub release_index_timeout: Duration,
    pub snapshot_retry: RetryPolicy,
    pub release_index_retry: RetryPolicy,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            node_operation_timeout: minutes(10),
            health_timeout: minutes(8),
            inter_node_delay: Duration::from_secs(30),
            talos_group_stabilization: minutes(2),
            kubernetes_group_stabilization: minutes(1),
            layer_stabilization: minutes(2),
            monitor_interval: Duration::from_secs(30),
            monitor_timeout: minutes(10),
            snapshot_timeout: Duration::from_secs(30),
            release_index_timeout: Duration::from_secs(30),
            snapshot_retry: RetryPolicy::fixed(3, Duration::from_secs(2)),
            release_index_retry: RetryPolicy::fixed(3, Duration::from_secs(2)),
        }
    }
}
