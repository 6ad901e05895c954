//! Post-batch convergence polling.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterInspector, ClusterSnapshot, Layer};
use crate::error::TkupError;
use crate::version::{Comparison, Version};
use crate::wait::bounded;

enum MonitorState {
    Polling,
    Done(Result<(), TkupError>),
}

/// Polls the cluster until every node of a batch is ready and reports the
/// target version, or the deadline passes.
pub struct ProgressMonitor<'a> {
    inspector: &'a dyn ClusterInspector,
    interval: Duration,
    timeout: Duration,
    snapshot_timeout: Duration,
    cancel: &'a CancellationToken,
}

impl<'a> ProgressMonitor<'a> {
    pub fn new(
        inspector: &'a dyn ClusterInspector,
        interval: Duration,
        timeout: Duration,
        snapshot_timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            inspector,
            interval,
            timeout,
            snapshot_timeout,
            cancel,
        }
    }

    /// Watch `batch` until it converges on `target` for `layer`.
    ///
    /// Fails with `ConvergenceTimeout` naming the outstanding nodes, or with
    /// `Cancelled` if the run is cancelled between ticks.
    pub async fn watch(&self, layer: Layer, target: &str, batch: &[String]) -> Result<(), TkupError> {
        let target = Version::parse(target)?;
        if batch.is_empty() {
            return Ok(());
        }

        info!(
            layer = %layer,
            target = %target,
            nodes = batch.len(),
            "Monitoring upgrade progress"
        );

        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut ticker = interval_at(start + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut converged: HashSet<&str> = HashSet::new();
        let mut state = MonitorState::Polling;

        loop {
            state = match state {
                MonitorState::Done(outcome) => return outcome,
                MonitorState::Polling => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => MonitorState::Done(Err(TkupError::Cancelled)),
                        _ = ticker.tick() => {
                            self.poll(layer, &target, batch, &mut converged).await;
                            if converged.len() == batch.len() {
                                info!(layer = %layer, elapsed_ms = start.elapsed().as_millis() as u64, "All nodes converged");
                                MonitorState::Done(Ok(()))
                            } else if Instant::now() >= deadline {
                                MonitorState::Done(Err(timeout_error(layer, batch, &converged)))
                            } else {
                                MonitorState::Polling
                            }
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            MonitorState::Done(Err(timeout_error(layer, batch, &converged)))
                        }
                    }
                }
            };
        }
    }

    /// One tick: refresh state and mark newly converged nodes.
    async fn poll<'b>(
        &self,
        layer: Layer,
        target: &Version,
        batch: &'b [String],
        converged: &mut HashSet<&'b str>,
    ) {
        let snapshot = match bounded(
            self.cancel,
            self.snapshot_timeout,
            "cluster snapshot",
            self.inspector.snapshot(),
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(layer = %layer, error = %e, "Failed to fetch cluster state, will retry on next tick");
                return;
            }
        };

        for name in batch {
            if converged.contains(name.as_str()) {
                continue;
            }
            if is_converged(&snapshot, layer, name, target) {
                debug!(node = %name, layer = %layer, "Node converged");
                converged.insert(name);
            }
        }

        debug!(
            layer = %layer,
            converged = converged.len(),
            total = batch.len(),
            "Upgrade progress"
        );
    }
}

/// Ready and reporting the target version for the layer.
///
/// Talos is checked per node; Kubernetes has one cluster-wide version.
fn is_converged(snapshot: &ClusterSnapshot, layer: Layer, name: &str, target: &Version) -> bool {
    let Some(node) = snapshot.node(name) else {
        return false;
    };
    if !node.ready {
        return false;
    }

    let reported = match layer {
        Layer::Talos => &node.talos_version,
        Layer::Kubernetes => &snapshot.kubernetes_version,
    };
    Version::parse(reported).is_ok_and(|v| v.compare(target) == Comparison::Equal)
}

fn timeout_error(layer: Layer, batch: &[String], converged: &HashSet<&str>) -> TkupError {
    TkupError::ConvergenceTimeout {
        layer,
        outstanding: batch
            .iter()
            .filter(|n| !converged.contains(n.as_str()))
            .cloned()
            .collect(),
    }
}
