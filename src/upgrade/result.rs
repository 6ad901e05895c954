//! Outcome types of a run and of a check-only run.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cluster::Layer;
use crate::error::TkupError;

/// A layer that was not upgraded in this run, with reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLayer {
    pub layer: Layer,
    pub reason: String,
}

/// Aggregated outcome of one orchestration run.
///
/// `upgraded_nodes` and `failed_nodes` are disjoint. A node that failed at
/// any point of the run stays failed even if a later operation on it works.
#[derive(Debug, Clone)]
pub struct UpgradeResult {
    pub talos_upgraded: bool,
    pub kubernetes_upgraded: bool,
    pub errors: Vec<TkupError>,
    pub upgraded_nodes: Vec<String>,
    pub failed_nodes: Vec<String>,
    pub skipped_layers: Vec<SkippedLayer>,
    /// Set the first time a node fails. Never acted upon automatically.
    pub rollback_required: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl UpgradeResult {
    pub fn new() -> Self {
        Self {
            talos_upgraded: false,
            kubernetes_upgraded: false,
            errors: Vec::new(),
            upgraded_nodes: Vec::new(),
            failed_nodes: Vec::new(),
            skipped_layers: Vec::new(),
            rollback_required: false,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    pub fn record_success(&mut self, node: &str) {
        if self.failed_nodes.iter().any(|n| n == node) {
            return;
        }
        if !self.upgraded_nodes.iter().any(|n| n == node) {
            self.upgraded_nodes.push(node.to_string());
        }
    }

    pub fn record_failure(&mut self, node: &str, error: TkupError) {
        self.upgraded_nodes.retain(|n| n != node);
        if !self.failed_nodes.iter().any(|n| n == node) {
            self.failed_nodes.push(node.to_string());
        }
        self.rollback_required = true;
        self.errors.push(error);
    }

    pub fn record_error(&mut self, error: TkupError) {
        self.errors.push(error);
    }

    pub fn skip_layer(&mut self, layer: Layer, reason: impl Into<String>) {
        self.skipped_layers.push(SkippedLayer {
            layer,
            reason: reason.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Share of touched nodes that succeeded, 0.0 when no node was touched.
    pub fn success_rate(&self) -> f64 {
        let total = self.upgraded_nodes.len() + self.failed_nodes.len();
        if total == 0 {
            return 0.0;
        }
        self.upgraded_nodes.len() as f64 / total as f64
    }
}

impl Default for UpgradeResult {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpgradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_errors() {
            write!(
                f,
                "Upgrades completed with errors: Talos={}, Kubernetes={}, Errors={}",
                self.talos_upgraded,
                self.kubernetes_upgraded,
                self.errors.len()
            )
        } else {
            write!(
                f,
                "Upgrades completed successfully: Talos={}, Kubernetes={}",
                self.talos_upgraded, self.kubernetes_upgraded
            )
        }
    }
}

/// Decisions for one layer in check-only mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerCheck {
    pub layer: Layer,
    pub current: String,
    pub target: String,
    pub needs_upgrade: bool,
    pub version_available: bool,
    pub available_versions: Vec<String>,
    /// Why the release gate refused the target, if it did.
    pub gate_error: Option<String>,
    /// Why the current version could not be compared with the target.
    pub compare_error: Option<String>,
    pub nodes_needing_upgrade: Vec<String>,
}

impl LayerCheck {
    /// The layer would be upgraded by a real run.
    pub fn would_upgrade(&self) -> bool {
        self.needs_upgrade && self.version_available
    }
}

/// Output of check-only mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub talos: LayerCheck,
    pub kubernetes: LayerCheck,
    pub node_count: usize,
    /// Conditions a real run would refuse to start on.
    pub prerequisite_issues: Vec<String>,
}

impl CheckReport {
    /// Nothing to do. A layer whose version could not be compared is never
    /// up to date.
    pub fn is_up_to_date(&self) -> bool {
        [&self.talos, &self.kubernetes]
            .iter()
            .all(|c| !c.needs_upgrade && c.compare_error.is_none())
    }
}
