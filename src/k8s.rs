//! Kubernetes API access.

pub mod client;
