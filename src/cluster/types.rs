//! Cluster state types.

use std::fmt;

/// The two independently versioned layers of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Talos,
    Kubernetes,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Talos => write!(f, "Talos"),
            Self::Kubernetes => write!(f, "Kubernetes"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub role: NodeRole,
    pub ready: bool,
    /// Talos version reported by this node.
    pub talos_version: String,
    /// Address used for direct node operations.
    pub endpoint: String,
}

/// Point-in-time read of cluster state. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub talos_version: String,
    pub kubernetes_version: String,
    pub nodes: Vec<NodeInfo>,
}

impl ClusterSnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Node names with the given role, in snapshot order.
    pub fn names_by_role(&self, role: NodeRole) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.role == role)
            .map(|n| n.name.clone())
            .collect()
    }

    pub fn not_ready(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !n.ready)
            .map(|n| n.name.as_str())
            .collect()
    }

    pub fn has_control_plane(&self) -> bool {
        self.nodes.iter().any(|n| n.role == NodeRole::ControlPlane)
    }
}
