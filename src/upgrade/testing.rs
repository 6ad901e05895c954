//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::{ClusterInspector, ClusterSnapshot, Layer, NodeInfo, NodeRole};
use crate::error::TkupError;
use crate::talos::{NodeUpgrader, WorkloadUpgrader};
use crate::upgrade::Timings;
use crate::version::{ReleaseIndex, Version};
use crate::wait::RetryPolicy;

pub fn node(name: &str, role: NodeRole, talos_version: &str) -> NodeInfo {
    NodeInfo {
        name: name.to_string(),
        role,
        ready: true,
        talos_version: talos_version.to_string(),
        endpoint: format!("{name}.lan"),
    }
}

pub fn snapshot(kubernetes_version: &str, nodes: Vec<NodeInfo>) -> ClusterSnapshot {
    ClusterSnapshot {
        talos_version: nodes
            .first()
            .map(|n| n.talos_version.clone())
            .unwrap_or_default(),
        kubernetes_version: kubernetes_version.to_string(),
        nodes,
    }
}

/// Millisecond timings so engine tests finish quickly.
pub fn fast_timings() -> Timings {
    let ms = Duration::from_millis;
    Timings {
        node_operation_timeout: ms(200),
        health_timeout: ms(200),
        inter_node_delay: ms(1),
        talos_group_stabilization: ms(1),
        kubernetes_group_stabilization: ms(1),
        layer_stabilization: ms(1),
        monitor_interval: ms(5),
        monitor_timeout: ms(60),
        snapshot_timeout: ms(200),
        release_index_timeout: ms(200),
        snapshot_retry: RetryPolicy::fixed(3, ms(1)),
        release_index_retry: RetryPolicy::fixed(3, ms(1)),
    }
}

#[derive(Default)]
struct State {
    snapshot: ClusterSnapshot,
    /// Remaining snapshot calls that fail before answering again.
    snapshot_failures: u32,
    failing_talos: HashSet<String>,
    failing_kubernetes: HashSet<String>,
    /// Node dropped from the cluster once this many snapshots were served.
    removal: Option<(String, u32)>,
    snapshots_served: u32,
    unhealthy: HashSet<String>,
    /// Upgrades are accepted but never reflected in later snapshots.
    frozen: bool,
    releases: HashMap<Layer, Result<Vec<Version>, TkupError>>,
    events: Vec<String>,
    /// `current` argument of every Kubernetes upgrade call.
    kubernetes_currents: Vec<String>,
}

/// One fake cluster implementing every collaborator trait.
///
/// Successful upgrades are applied to the snapshot it serves, so progress
/// monitoring converges unless the cluster is frozen.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new(snapshot: ClusterSnapshot) -> Self {
        let cluster = Self::default();
        cluster.state.lock().unwrap().snapshot = snapshot;
        cluster
    }

    pub fn with_releases(self, layer: Layer, versions: &[&str]) -> Self {
        let versions = versions.iter().map(|v| Version::parse(v).unwrap()).collect();
        self.state.lock().unwrap().releases.insert(layer, Ok(versions));
        self
    }

    pub fn with_release_error(self, layer: Layer, error: TkupError) -> Self {
        self.state.lock().unwrap().releases.insert(layer, Err(error));
        self
    }

    pub fn failing_upgrade(self, node: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_talos
            .insert(node.to_string());
        self
    }

    pub fn failing_kubernetes_upgrade(self, node: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_kubernetes
            .insert(node.to_string());
        self
    }

    /// Drop `node` from the cluster after `snapshots` snapshots were served.
    pub fn removing_after(self, node: &str, snapshots: u32) -> Self {
        self.state.lock().unwrap().removal = Some((node.to_string(), snapshots));
        self
    }

    pub fn unhealthy(self, node: &str) -> Self {
        self.state.lock().unwrap().unhealthy.insert(node.to_string());
        self
    }

    pub fn frozen(self) -> Self {
        self.state.lock().unwrap().frozen = true;
        self
    }

    pub fn failing_snapshots(self, count: u32) -> Self {
        self.state.lock().unwrap().snapshot_failures = count;
        self
    }

    /// Upgrade and health events in call order, e.g. `talos:cp-1`.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// Events of one kind, as node names.
    pub fn events_of(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{kind}:");
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn kubernetes_currents(&self) -> Vec<String> {
        self.state.lock().unwrap().kubernetes_currents.clone()
    }

    fn node_name(state: &State, endpoint: &str) -> String {
        state
            .snapshot
            .nodes
            .iter()
            .find(|n| n.endpoint == endpoint)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| endpoint.to_string())
    }
}

#[async_trait]
impl ClusterInspector for FakeCluster {
    async fn snapshot(&self) -> Result<ClusterSnapshot, TkupError> {
        let mut state = self.state.lock().unwrap();
        if state.snapshot_failures > 0 {
            state.snapshot_failures -= 1;
            return Err(TkupError::unavailable("fake", "apiserver unreachable"));
        }
        if let Some((name, after)) = state.removal.clone() {
            if state.snapshots_served >= after {
                state.snapshot.nodes.retain(|n| n.name != name);
            }
        }
        state.snapshots_served += 1;
        Ok(state.snapshot.clone())
    }
}

#[async_trait]
impl ReleaseIndex for FakeCluster {
    async fn available_versions(&self, layer: Layer) -> Result<Vec<Version>, TkupError> {
        let state = self.state.lock().unwrap();
        state
            .releases
            .get(&layer)
            .cloned()
            .unwrap_or(Err(TkupError::NoStableVersions(layer)))
    }
}

#[async_trait]
impl NodeUpgrader for FakeCluster {
    async fn upgrade(&self, endpoint: &str, image_ref: &str) -> Result<(), TkupError> {
        let mut state = self.state.lock().unwrap();
        let name = Self::node_name(&state, endpoint);
        state.events.push(format!("talos:{name}"));

        if state.failing_talos.contains(&name) {
            return Err(TkupError::UpgradeInitiationFailed {
                node: endpoint.to_string(),
                details: "machined refused the request".to_string(),
            });
        }

        if !state.frozen {
            let version = image_ref.rsplit(':').next().unwrap_or_default().to_string();
            if let Some(node) = state.snapshot.nodes.iter_mut().find(|n| n.name == name) {
                node.talos_version = version;
            }
        }
        Ok(())
    }

    async fn await_healthy(&self, endpoint: &str, timeout: Duration) -> Result<(), TkupError> {
        let unhealthy = {
            let mut state = self.state.lock().unwrap();
            let name = Self::node_name(&state, endpoint);
            state.events.push(format!("health:{name}"));
            state.unhealthy.contains(&name)
        };

        if unhealthy {
            tokio::time::sleep(timeout).await;
            return Err(TkupError::Timeout {
                operation: format!("node {endpoint} to come back online"),
                details: "no answer".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadUpgrader for FakeCluster {
    async fn upgrade(&self, endpoint: &str, current: &str, target: &str) -> Result<(), TkupError> {
        let mut state = self.state.lock().unwrap();
        let name = Self::node_name(&state, endpoint);
        state.events.push(format!("k8s:{name}"));
        state.kubernetes_currents.push(current.to_string());

        if state.failing_kubernetes.contains(&name) {
            return Err(TkupError::UpgradeFailed {
                node: endpoint.to_string(),
                details: "static pod update failed".to_string(),
            });
        }

        if !state.frozen {
            state.snapshot.kubernetes_version = target.to_string();
        }
        Ok(())
    }
}
