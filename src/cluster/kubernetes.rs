//! Cluster inspector backed by the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::api::ListParams;
use tracing::debug;

use super::{ClusterInspector, ClusterSnapshot, NodeInfo, NodeRole};
use crate::error::TkupError;

const CONTROL_PLANE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Address types tried in order when resolving a node endpoint.
const ENDPOINT_ADDRESS_TYPES: &[&str] = &["InternalIP", "ExternalIP", "Hostname"];

pub struct KubeInspector {
    client: kube::Client,
}

impl KubeInspector {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterInspector for KubeInspector {
    async fn snapshot(&self) -> Result<ClusterSnapshot, TkupError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        let nodes: Vec<NodeInfo> = nodes.items.iter().map(node_info).collect();

        let server = self.client.apiserver_version().await?;

        let talos_version = nodes
            .iter()
            .find(|n| n.role == NodeRole::ControlPlane)
            .or_else(|| nodes.first())
            .map(|n| n.talos_version.clone())
            .unwrap_or_default();

        debug!(
            nodes = nodes.len(),
            talos = %talos_version,
            kubernetes = %server.git_version,
            "Fetched cluster snapshot"
        );

        Ok(ClusterSnapshot {
            talos_version,
            kubernetes_version: server.git_version,
            nodes,
        })
    }
}

fn node_info(node: &Node) -> NodeInfo {
    let name = node.metadata.name.clone().unwrap_or_default();
    let role = if is_control_plane(node) {
        NodeRole::ControlPlane
    } else {
        NodeRole::Worker
    };
    let talos_version = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| parse_talos_version(&info.os_image))
        .unwrap_or_default();

    NodeInfo {
        endpoint: endpoint(node).unwrap_or_else(|| name.clone()),
        ready: is_ready(node),
        name,
        role,
        talos_version,
    }
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn is_control_plane(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| CONTROL_PLANE_LABELS.iter().any(|l| labels.contains_key(*l)))
}

fn endpoint(node: &Node) -> Option<String> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    ENDPOINT_ADDRESS_TYPES.iter().find_map(|kind| {
        addresses
            .iter()
            .find(|a| a.type_ == *kind && !a.address.is_empty())
            .map(|a| a.address.clone())
    })
}

/// Extract the version from an OS image string such as `Talos (v1.10.5)`.
fn parse_talos_version(os_image: &str) -> String {
    os_image
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(version, _)| version.trim().to_string())
        .unwrap_or_default()
}
