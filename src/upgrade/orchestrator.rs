//! Top-level upgrade state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::result::{CheckReport, LayerCheck, UpgradeResult};
use super::sequencer::{LayerOperation, NodeSequencer};
use super::timings::Timings;
use crate::cluster::{ClusterInspector, ClusterSnapshot, Layer, NodeRole};
use crate::config::{UpgradeConfig, UpgradeOrder};
use crate::error::TkupError;
use crate::talos::{NodeUpgrader, WorkloadUpgrader};
use crate::version::{Comparison, ReleaseIndex, Version, compare, validate_target_available};
use crate::wait::{bounded, format_duration, pause};

/// States of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorPhase {
    ValidatingPrerequisites,
    Planning,
    UpgradingTalos,
    UpgradingKubernetes,
    Done,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidatingPrerequisites => write!(f, "ValidatingPrerequisites"),
            Self::Planning => write!(f, "Planning"),
            Self::UpgradingTalos => write!(f, "UpgradingTalos"),
            Self::UpgradingKubernetes => write!(f, "UpgradingKubernetes"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Decisions taken from the planning snapshot.
#[derive(Debug, Clone)]
struct UpgradePlan {
    /// Nodes whose Talos version is older than the target, or unparsable.
    talos_nodes: Vec<String>,
    kubernetes_needs_upgrade: Result<bool, TkupError>,
}

/// Drives a complete run across both layers.
pub struct Orchestrator {
    inspector: Arc<dyn ClusterInspector>,
    releases: Arc<dyn ReleaseIndex>,
    node_upgrader: Arc<dyn NodeUpgrader>,
    workload_upgrader: Arc<dyn WorkloadUpgrader>,
    config: UpgradeConfig,
    timings: Timings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        inspector: Arc<dyn ClusterInspector>,
        releases: Arc<dyn ReleaseIndex>,
        node_upgrader: Arc<dyn NodeUpgrader>,
        workload_upgrader: Arc<dyn WorkloadUpgrader>,
        config: UpgradeConfig,
        timings: Timings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inspector,
            releases,
            node_upgrader,
            workload_upgrader,
            config,
            timings,
            cancel,
        }
    }

    /// Run the upgrade.
    ///
    /// Fails only when the initial snapshot cannot be taken or the cluster
    /// does not meet the prerequisites. Everything after that is captured in
    /// the returned result.
    pub async fn run(&self) -> Result<UpgradeResult, TkupError> {
        let started = Instant::now();
        let mut result = UpgradeResult::new();

        enter(OrchestratorPhase::ValidatingPrerequisites);
        let snapshot = self.fetch_snapshot().await?;
        validate_prerequisites(&snapshot)?;

        enter(OrchestratorPhase::Planning);
        info!(
            current_talos = %snapshot.talos_version,
            current_kubernetes = %snapshot.kubernetes_version,
            target_talos = %self.config.talos.version,
            target_kubernetes = %self.config.kubernetes.version,
            total_nodes = snapshot.nodes.len(),
            "Current vs target versions"
        );
        let plan = self.plan(&snapshot);

        enter(OrchestratorPhase::UpgradingTalos);
        if let Err(e) = self.upgrade_talos(&plan, &snapshot, &mut result).await {
            error!(error = %e, "Run aborted");
            result.record_error(e);
            return Ok(self.finish(result, started));
        }

        enter(OrchestratorPhase::UpgradingKubernetes);
        if let Err(e) = self.upgrade_kubernetes(&plan, &snapshot, &mut result).await {
            error!(error = %e, "Run aborted");
            result.record_error(e);
        }

        Ok(self.finish(result, started))
    }

    /// Take the same decisions as [`Orchestrator::run`] without invoking any
    /// upgrader.
    pub async fn check_only(&self) -> Result<CheckReport, TkupError> {
        let snapshot = self.fetch_snapshot().await?;
        let prerequisite_issues = prerequisite_issues(&snapshot);
        let plan = self.plan(&snapshot);

        let mut talos = LayerCheck {
            layer: Layer::Talos,
            current: snapshot.talos_version.clone(),
            target: self.config.talos.version.clone(),
            needs_upgrade: !plan.talos_nodes.is_empty(),
            version_available: false,
            available_versions: Vec::new(),
            gate_error: None,
            compare_error: None,
            nodes_needing_upgrade: plan.talos_nodes.clone(),
        };
        self.check_gate(&mut talos).await?;

        let kubernetes_needs_upgrade = plan.kubernetes_needs_upgrade.as_ref().is_ok_and(|b| *b);
        let mut kubernetes = LayerCheck {
            layer: Layer::Kubernetes,
            current: snapshot.kubernetes_version.clone(),
            target: self.config.kubernetes.version.clone(),
            needs_upgrade: kubernetes_needs_upgrade,
            version_available: false,
            available_versions: Vec::new(),
            gate_error: None,
            compare_error: plan
                .kubernetes_needs_upgrade
                .as_ref()
                .err()
                .map(ToString::to_string),
            nodes_needing_upgrade: if kubernetes_needs_upgrade {
                snapshot.nodes.iter().map(|n| n.name.clone()).collect()
            } else {
                Vec::new()
            },
        };
        self.check_gate(&mut kubernetes).await?;

        Ok(CheckReport {
            talos,
            kubernetes,
            node_count: snapshot.nodes.len(),
            prerequisite_issues,
        })
    }

    async fn check_gate(&self, check: &mut LayerCheck) -> Result<(), TkupError> {
        match self.gate(check.layer, &check.target).await {
            Ok(available) => {
                check.version_available = true;
                check.available_versions = available.iter().map(ToString::to_string).collect();
            }
            Err(TkupError::Cancelled) => return Err(TkupError::Cancelled),
            Err(e) => {
                if let TkupError::NotYetReleased { available, .. } = &e {
                    check.available_versions = available.clone();
                }
                check.gate_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    fn plan(&self, snapshot: &ClusterSnapshot) -> UpgradePlan {
        let target = &self.config.talos.version;
        let mut talos_nodes = Vec::new();

        for node in &snapshot.nodes {
            match compare::compare(&node.talos_version, target) {
                Ok(Comparison::Older) => {
                    debug!(node = %node.name, current = %node.talos_version, "Node needs Talos upgrade");
                    talos_nodes.push(node.name.clone());
                }
                Ok(Comparison::Equal) => {
                    debug!(node = %node.name, "Node already at target Talos version");
                }
                Ok(Comparison::Newer) => {
                    warn!(
                        node = %node.name,
                        current = %node.talos_version,
                        target = %target,
                        "Node is newer than target, downgrade is not supported and will be skipped"
                    );
                }
                Err(e) => {
                    warn!(
                        node = %node.name,
                        error = %e,
                        "Cannot compare Talos version, assuming node needs upgrade"
                    );
                    talos_nodes.push(node.name.clone());
                }
            }
        }

        let kubernetes_target = &self.config.kubernetes.version;
        let kubernetes_needs_upgrade =
            compare::compare(&snapshot.kubernetes_version, kubernetes_target).map(
                |comparison| {
                    if comparison == Comparison::Newer {
                        warn!(
                            current = %snapshot.kubernetes_version,
                            target = %kubernetes_target,
                            "Kubernetes is newer than target, downgrade is not supported and will be skipped"
                        );
                    }
                    comparison == Comparison::Older
                },
            );

        UpgradePlan {
            talos_nodes,
            kubernetes_needs_upgrade,
        }
    }

    /// Returns an error only when the run must stop.
    async fn upgrade_talos(
        &self,
        plan: &UpgradePlan,
        planning_snapshot: &ClusterSnapshot,
        result: &mut UpgradeResult,
    ) -> Result<(), TkupError> {
        let target = &self.config.talos.version;

        if let Some(reason) = self.gate_or_skip(Layer::Talos, target).await? {
            result.skip_layer(Layer::Talos, reason);
            return Ok(());
        }

        if plan.talos_nodes.is_empty() {
            info!(target = %target, "Talos is already at the target version on every node");
            return Ok(());
        }
        info!(nodes = ?plan.talos_nodes, target = %target, "Talos upgrade required");

        let Some(snapshot) = self.phase_snapshot(Layer::Talos, result).await? else {
            return Ok(());
        };

        let image_ref = self.config.talos.image_ref();
        let operation = LayerOperation::Talos {
            upgrader: self.node_upgrader.as_ref(),
            image_ref: &image_ref,
        };
        let groups = role_groups(planning_snapshot, &plan.talos_nodes, self.config.talos.order);

        let completed = self
            .run_groups(
                &operation,
                target,
                &groups,
                &snapshot,
                self.timings.talos_group_stabilization,
                result,
            )
            .await?;
        if completed {
            info!("Talos upgrade completed");
            result.talos_upgraded = true;
        }
        Ok(())
    }

    /// Returns an error only when the run must stop.
    async fn upgrade_kubernetes(
        &self,
        plan: &UpgradePlan,
        planning_snapshot: &ClusterSnapshot,
        result: &mut UpgradeResult,
    ) -> Result<(), TkupError> {
        let target = &self.config.kubernetes.version;

        if let Some(reason) = self.gate_or_skip(Layer::Kubernetes, target).await? {
            result.skip_layer(Layer::Kubernetes, reason);
            return Ok(());
        }

        match &plan.kubernetes_needs_upgrade {
            Err(e) => {
                error!(error = %e, "Failed to check Kubernetes version");
                result.record_error(e.clone());
                return Ok(());
            }
            Ok(false) => {
                info!(
                    current = %planning_snapshot.kubernetes_version,
                    "Kubernetes is already at the target version"
                );
                return Ok(());
            }
            Ok(true) => info!(
                current = %planning_snapshot.kubernetes_version,
                target = %target,
                "Kubernetes upgrade required"
            ),
        }

        if result.talos_upgraded {
            info!(
                "Waiting {} for Talos upgrade to stabilize before upgrading Kubernetes",
                format_duration(self.timings.layer_stabilization)
            );
            pause(&self.cancel, self.timings.layer_stabilization).await?;
        }

        let Some(snapshot) = self.phase_snapshot(Layer::Kubernetes, result).await? else {
            return Ok(());
        };

        let operation = LayerOperation::Kubernetes {
            upgrader: self.workload_upgrader.as_ref(),
            current: &snapshot.kubernetes_version,
        };
        let all_nodes: Vec<String> = planning_snapshot
            .nodes
            .iter()
            .map(|n| n.name.clone())
            .collect();
        let groups = role_groups(planning_snapshot, &all_nodes, self.config.kubernetes.order);

        let completed = self
            .run_groups(
                &operation,
                target,
                &groups,
                &snapshot,
                self.timings.kubernetes_group_stabilization,
                result,
            )
            .await?;
        if completed {
            info!("Kubernetes upgrade completed");
            result.kubernetes_upgraded = true;
        }
        Ok(())
    }

    /// Run each non-empty role group in order, pausing between groups.
    ///
    /// Returns `Ok(false)` when a batch failed; the rest of the layer is
    /// abandoned and the failure is recorded.
    async fn run_groups(
        &self,
        operation: &LayerOperation<'_>,
        target: &str,
        groups: &[(NodeRole, Vec<String>)],
        snapshot: &ClusterSnapshot,
        stabilization: Duration,
        result: &mut UpgradeResult,
    ) -> Result<bool, TkupError> {
        let layer = operation.layer();
        let sequencer = NodeSequencer::new(self.inspector.as_ref(), &self.timings, &self.cancel);

        for (i, (role, names)) in groups.iter().enumerate() {
            if i > 0 {
                info!(
                    "Waiting {} for {} nodes to stabilize",
                    format_duration(stabilization),
                    groups[i - 1].0
                );
                pause(&self.cancel, stabilization).await?;
            }

            info!(layer = %layer, role = %role, nodes = ?names, "Upgrading {} nodes", role);
            match sequencer.run(operation, target, names, snapshot, result).await {
                Ok(()) => {}
                Err(TkupError::Cancelled) => return Err(TkupError::Cancelled),
                Err(e) => {
                    error!(layer = %layer, role = %role, error = %e, "Batch failed, skipping rest of layer");
                    result.record_error(e);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// `Some(reason)` when the release gate refuses the target.
    async fn gate_or_skip(&self, layer: Layer, target: &str) -> Result<Option<String>, TkupError> {
        match self.gate(layer, target).await {
            Ok(_) => Ok(None),
            Err(TkupError::Cancelled) => Err(TkupError::Cancelled),
            Err(e) => {
                warn!(layer = %layer, target, error = %e, "Release gate failed, skipping {} upgrade", layer);
                Ok(Some(e.to_string()))
            }
        }
    }

    async fn gate(&self, layer: Layer, target: &str) -> Result<Vec<Version>, TkupError> {
        validate_target_available(
            self.releases.as_ref(),
            layer,
            target,
            &self.timings.release_index_retry,
            self.timings.release_index_timeout,
            &self.cancel,
        )
        .await
    }

    /// Fresh snapshot before a layer starts. A failure other than
    /// cancellation is recorded and skips the layer.
    async fn phase_snapshot(
        &self,
        layer: Layer,
        result: &mut UpgradeResult,
    ) -> Result<Option<ClusterSnapshot>, TkupError> {
        match self.fetch_snapshot().await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(TkupError::Cancelled) => Err(TkupError::Cancelled),
            Err(e) => {
                error!(layer = %layer, error = %e, "Failed to refresh cluster state");
                result.record_error(e);
                Ok(None)
            }
        }
    }

    async fn fetch_snapshot(&self) -> Result<ClusterSnapshot, TkupError> {
        let inspector = self.inspector.as_ref();
        let cancel = &self.cancel;
        let limit = self.timings.snapshot_timeout;

        self.timings
            .snapshot_retry
            .run(cancel, "cluster snapshot", move || {
                bounded(cancel, limit, "cluster snapshot", inspector.snapshot())
            })
            .await
    }

    fn finish(&self, mut result: UpgradeResult, started: Instant) -> UpgradeResult {
        enter(OrchestratorPhase::Done);
        result.duration = started.elapsed();

        if result.has_errors() {
            error!(
                success_rate = result.success_rate(),
                errors = result.errors.len(),
                "Upgrade process completed with errors"
            );
            for (i, e) in result.errors.iter().enumerate() {
                error!(error_index = i, error = %e, "Upgrade error");
            }
            if result.rollback_required {
                warn!(failed_nodes = ?result.failed_nodes, "Rollback may be required due to failed nodes");
            }
        } else {
            info!(
                talos_upgraded = result.talos_upgraded,
                kubernetes_upgraded = result.kubernetes_upgraded,
                duration = %format_duration(result.duration),
                "Upgrade process completed successfully"
            );
        }
        result
    }
}

fn enter(phase: OrchestratorPhase) {
    info!(phase = %phase, "Entering phase");
}

/// Reasons a run would refuse to start; empty when the cluster is fit.
pub fn prerequisite_issues(snapshot: &ClusterSnapshot) -> Vec<String> {
    let mut issues = Vec::new();

    let not_ready = snapshot.not_ready();
    if !not_ready.is_empty() {
        issues.push(format!("nodes not ready: {}", not_ready.join(", ")));
    }
    if !snapshot.has_control_plane() {
        issues.push("no control-plane nodes found".to_string());
    }
    issues
}

fn validate_prerequisites(snapshot: &ClusterSnapshot) -> Result<(), TkupError> {
    let issues = prerequisite_issues(snapshot);
    if issues.is_empty() {
        info!(nodes = snapshot.nodes.len(), "Upgrade prerequisites validated");
        Ok(())
    } else {
        Err(TkupError::PrerequisitesNotMet(issues.join("; ")))
    }
}

/// Split `names` into role groups in the configured order, dropping empty
/// groups. Roles come from the planning snapshot; the sequencer resolves
/// names against a fresher one.
fn role_groups(
    snapshot: &ClusterSnapshot,
    names: &[String],
    order: UpgradeOrder,
) -> Vec<(NodeRole, Vec<String>)> {
    order
        .roles()
        .into_iter()
        .map(|role| {
            let group: Vec<String> = snapshot
                .names_by_role(role)
                .into_iter()
                .filter(|n| names.contains(n))
                .collect();
            (role, group)
        })
        .filter(|(_, group)| !group.is_empty())
        .collect()
}
