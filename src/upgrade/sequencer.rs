//! One-node-at-a-time batch execution.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::monitor::ProgressMonitor;
use super::result::UpgradeResult;
use super::timings::Timings;
use crate::cluster::{ClusterInspector, ClusterSnapshot, Layer, NodeInfo};
use crate::error::TkupError;
use crate::talos::{NodeUpgrader, WorkloadUpgrader};
use crate::wait::{bounded, format_duration, pause};

/// What to do to each node of a batch.
pub enum LayerOperation<'a> {
    /// Install `image_ref` and wait for the node to come back.
    Talos {
        upgrader: &'a dyn NodeUpgrader,
        image_ref: &'a str,
    },
    /// Move the Kubernetes components through the node. The cluster version
    /// is re-read before each node; `current` is used when that read fails.
    Kubernetes {
        upgrader: &'a dyn WorkloadUpgrader,
        current: &'a str,
    },
}

impl LayerOperation<'_> {
    pub fn layer(&self) -> Layer {
        match self {
            Self::Talos { .. } => Layer::Talos,
            Self::Kubernetes { .. } => Layer::Kubernetes,
        }
    }
}

pub struct NodeSequencer<'a> {
    inspector: &'a dyn ClusterInspector,
    timings: &'a Timings,
    cancel: &'a CancellationToken,
}

impl<'a> NodeSequencer<'a> {
    pub fn new(
        inspector: &'a dyn ClusterInspector,
        timings: &'a Timings,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            inspector,
            timings,
            cancel,
        }
    }

    /// Upgrade `batch` in order, strictly one node at a time.
    ///
    /// Per-node failures are recorded in `result` and do not stop the batch.
    /// Returns an error only for batch-level failures: a node missing from
    /// `snapshot`, a cancelled pause, or the progress monitor failing.
    pub async fn run(
        &self,
        operation: &LayerOperation<'_>,
        target: &str,
        batch: &[String],
        snapshot: &ClusterSnapshot,
        result: &mut UpgradeResult,
    ) -> Result<(), TkupError> {
        let layer = operation.layer();

        for (i, name) in batch.iter().enumerate() {
            let node = snapshot
                .node(name)
                .ok_or_else(|| TkupError::NodeNotFound(name.clone()))?;

            info!(
                node = %name,
                layer = %layer,
                position = i + 1,
                total = batch.len(),
                "Starting node upgrade"
            );

            match self.upgrade_node(operation, node, target).await {
                Ok(()) => {
                    info!(node = %name, layer = %layer, "Node upgrade completed");
                    result.record_success(name);
                }
                Err(e) => {
                    error!(node = %name, layer = %layer, error = %e, "Node upgrade failed");
                    result.record_failure(name, e);
                }
            }

            if i + 1 < batch.len() {
                info!(
                    "Waiting {} before upgrading next node",
                    format_duration(self.timings.inter_node_delay)
                );
                pause(self.cancel, self.timings.inter_node_delay).await?;
            }
        }

        let monitor = ProgressMonitor::new(
            self.inspector,
            self.timings.monitor_interval,
            self.timings.monitor_timeout,
            self.timings.snapshot_timeout,
            self.cancel,
        );
        monitor.watch(layer, target, batch).await.inspect_err(|e| {
            warn!(layer = %layer, error = %e, "Upgrade monitoring detected issues");
        })
    }

    async fn upgrade_node(
        &self,
        operation: &LayerOperation<'_>,
        node: &NodeInfo,
        target: &str,
    ) -> Result<(), TkupError> {
        let endpoint = node.endpoint.as_str();

        match operation {
            LayerOperation::Talos {
                upgrader,
                image_ref,
            } => {
                bounded(
                    self.cancel,
                    self.timings.node_operation_timeout,
                    &format!("Talos upgrade of {}", node.name),
                    upgrader.upgrade(endpoint, image_ref),
                )
                .await?;

                info!(node = %node.name, "Upgrade initiated, waiting for node to reboot");
                let health_timeout = self.timings.health_timeout;
                bounded(
                    self.cancel,
                    health_timeout,
                    &format!("node {} to become healthy", node.name),
                    upgrader.await_healthy(endpoint, health_timeout),
                )
                .await
            }
            LayerOperation::Kubernetes { upgrader, current } => {
                let current = self.cluster_kubernetes_version(current).await?;
                bounded(
                    self.cancel,
                    self.timings.node_operation_timeout,
                    &format!("Kubernetes upgrade via {}", node.name),
                    upgrader.upgrade(endpoint, &current, target),
                )
                .await
            }
        }
    }

    /// The cluster-wide Kubernetes version right now. An earlier node of the
    /// batch may already have moved it.
    async fn cluster_kubernetes_version(&self, fallback: &str) -> Result<String, TkupError> {
        match bounded(
            self.cancel,
            self.timings.snapshot_timeout,
            "cluster snapshot",
            self.inspector.snapshot(),
        )
        .await
        {
            Ok(snapshot) => Ok(snapshot.kubernetes_version),
            Err(TkupError::Cancelled) => Err(TkupError::Cancelled),
            Err(e) => {
                warn!(error = %e, fallback, "Failed to refresh Kubernetes version, using phase snapshot");
                Ok(fallback.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeRole;
    use crate::upgrade::testing::{FakeCluster, fast_timings, node, snapshot};

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn workers() -> ClusterSnapshot {
        snapshot(
            "v1.33.2",
            vec![
                node("cp-1", NodeRole::ControlPlane, "v1.10.4"),
                node("worker-1", NodeRole::Worker, "v1.10.4"),
                node("worker-2", NodeRole::Worker, "v1.10.4"),
                node("worker-3", NodeRole::Worker, "v1.10.4"),
            ],
        )
    }

    fn talos_op(cluster: &FakeCluster) -> LayerOperation<'_> {
        LayerOperation::Talos {
            upgrader: cluster,
            image_ref: "factory.talos.dev/installer/abc:v1.10.5",
        }
    }

    #[tokio::test]
    async fn test_run_upgrades_in_order() {
        let cluster = FakeCluster::new(workers());
        let timings = fast_timings();
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        let batch = names(&["worker-2", "worker-1", "worker-3"]);
        sequencer
            .run(&talos_op(&cluster), "v1.10.5", &batch, &workers(), &mut result)
            .await
            .unwrap();

        assert_eq!(
            cluster.events(),
            vec![
                "talos:worker-2",
                "health:worker-2",
                "talos:worker-1",
                "health:worker-1",
                "talos:worker-3",
                "health:worker-3",
            ]
        );
        assert_eq!(result.upgraded_nodes, batch);
        assert!(result.failed_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_run_isolates_node_failure() {
        let cluster = FakeCluster::new(workers()).failing_upgrade("worker-2");
        let timings = fast_timings();
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        let batch = names(&["worker-1", "worker-2", "worker-3"]);
        let err = sequencer
            .run(&talos_op(&cluster), "v1.10.5", &batch, &workers(), &mut result)
            .await
            .unwrap_err();

        assert_eq!(
            cluster.events_of("talos"),
            vec!["worker-1", "worker-2", "worker-3"]
        );
        assert_eq!(result.upgraded_nodes, names(&["worker-1", "worker-3"]));
        assert_eq!(result.failed_nodes, names(&["worker-2"]));
        assert!(result.rollback_required);
        assert_eq!(
            err,
            TkupError::ConvergenceTimeout {
                layer: Layer::Talos,
                outstanding: names(&["worker-2"]),
            }
        );
    }

    #[tokio::test]
    async fn test_run_records_unhealthy_node() {
        let cluster = FakeCluster::new(workers()).unhealthy("worker-1");
        let mut timings = fast_timings();
        timings.health_timeout = std::time::Duration::from_millis(10);
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        sequencer
            .run(
                &talos_op(&cluster),
                "v1.10.5",
                &names(&["worker-1", "worker-2"]),
                &workers(),
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(result.failed_nodes, names(&["worker-1"]));
        assert_eq!(result.upgraded_nodes, names(&["worker-2"]));
        assert!(matches!(result.errors[0], TkupError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_aborts_on_unknown_node() {
        let cluster = FakeCluster::new(workers());
        let timings = fast_timings();
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        let err = sequencer
            .run(
                &talos_op(&cluster),
                "v1.10.5",
                &names(&["worker-1", "worker-9", "worker-2"]),
                &workers(),
                &mut result,
            )
            .await
            .unwrap_err();

        assert_eq!(err, TkupError::NodeNotFound("worker-9".to_string()));
        assert_eq!(cluster.events_of("talos"), vec!["worker-1"]);
        assert_eq!(result.upgraded_nodes, names(&["worker-1"]));
    }

    #[tokio::test]
    async fn test_run_kubernetes_has_no_health_wait() {
        let cluster = FakeCluster::new(workers());
        let timings = fast_timings();
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        let operation = LayerOperation::Kubernetes {
            upgrader: &cluster,
            current: "v1.33.2",
        };
        sequencer
            .run(
                &operation,
                "v1.33.3",
                &names(&["cp-1", "worker-1"]),
                &workers(),
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(cluster.events(), vec!["k8s:cp-1", "k8s:worker-1"]);
        assert_eq!(result.upgraded_nodes, names(&["cp-1", "worker-1"]));
    }

    #[tokio::test]
    async fn test_run_kubernetes_rereads_current_version_per_node() {
        let cluster = FakeCluster::new(workers());
        let timings = fast_timings();
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        let operation = LayerOperation::Kubernetes {
            upgrader: &cluster,
            current: "v1.33.2",
        };
        sequencer
            .run(
                &operation,
                "v1.33.3",
                &names(&["cp-1", "worker-1"]),
                &workers(),
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(cluster.kubernetes_currents(), vec!["v1.33.2", "v1.33.3"]);
    }

    #[tokio::test]
    async fn test_run_kubernetes_falls_back_when_refresh_fails() {
        let cluster = FakeCluster::new(workers()).failing_snapshots(1);
        let timings = fast_timings();
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        let operation = LayerOperation::Kubernetes {
            upgrader: &cluster,
            current: "v1.33.1",
        };
        sequencer
            .run(&operation, "v1.33.3", &names(&["cp-1"]), &workers(), &mut result)
            .await
            .unwrap();

        assert_eq!(cluster.kubernetes_currents(), vec!["v1.33.1"]);
        assert_eq!(result.upgraded_nodes, names(&["cp-1"]));
    }

    #[tokio::test]
    async fn test_run_cancelled_during_inter_node_delay() {
        let cluster = FakeCluster::new(workers());
        let mut timings = fast_timings();
        timings.inter_node_delay = std::time::Duration::from_secs(30);
        let cancel = CancellationToken::new();
        let sequencer = NodeSequencer::new(&cluster, &timings, &cancel);
        let mut result = UpgradeResult::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = sequencer
            .run(
                &talos_op(&cluster),
                "v1.10.5",
                &names(&["worker-1", "worker-2"]),
                &workers(),
                &mut result,
            )
            .await
            .unwrap_err();

        assert_eq!(err, TkupError::Cancelled);
        assert_eq!(cluster.events_of("talos"), vec!["worker-1"]);
    }
}
