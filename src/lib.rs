//! tkup - Talos Linux and Kubernetes phased cluster upgrade CLI tool.
//!
//! Upgrades a Talos cluster in two layers:
//! - Talos Linux on each node, rebooting one node at a time
//! - Kubernetes components, driven through each node in turn
//!
//! Both layers are gated on the target version being released upstream and
//! upgrade nodes grouped by role in a configurable order.

pub mod cluster;
pub mod config;
pub mod error;
pub mod k8s;
pub mod logging;
pub mod output;
pub mod talos;
pub mod upgrade;
pub mod version;
pub mod wait;
