//! Upgraders that drive the `talosctl` CLI.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use super::{NodeUpgrader, WorkloadUpgrader};
use crate::error::TkupError;
use crate::version::{Comparison, Version};

const DEFAULT_REBOOT_GRACE: Duration = Duration::from_secs(30);
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Output of one finished `talosctl` invocation.
struct CommandOutput {
    success: bool,
    stderr: String,
}

#[derive(Debug, Clone)]
pub struct Talosctl {
    binary: String,
    talosconfig: Option<PathBuf>,
    /// Time a node gets to go down for reboot before it is probed.
    reboot_grace: Duration,
    probe_interval: Duration,
    probe_timeout: Duration,
}

impl Talosctl {
    pub fn new(talosconfig: Option<PathBuf>) -> Self {
        Self {
            binary: "talosctl".to_string(),
            talosconfig,
            reboot_grace: DEFAULT_REBOOT_GRACE,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Global arguments plus the node selector, shared by every subcommand.
    fn base_args(&self, endpoint: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.talosconfig {
            args.push("--talosconfig".to_string());
            args.push(path.display().to_string());
        }
        args.push("--nodes".to_string());
        args.push(endpoint.to_string());
        args
    }

    fn upgrade_args(&self, endpoint: &str, image_ref: &str) -> Vec<String> {
        let mut args = self.base_args(endpoint);
        args.extend([
            "upgrade".to_string(),
            "--image".to_string(),
            image_ref.to_string(),
            "--wait=false".to_string(),
        ]);
        args
    }

    fn version_args(&self, endpoint: &str) -> Vec<String> {
        let mut args = self.base_args(endpoint);
        args.extend(["version".to_string(), "--short".to_string()]);
        args
    }

    /// `--from` is left out when the cluster already reports the target, so
    /// talosctl detects the running version itself.
    fn upgrade_k8s_args(&self, endpoint: &str, current: &str, target: &str) -> Vec<String> {
        let mut args = self.base_args(endpoint);
        args.extend([
            "upgrade-k8s".to_string(),
            "--endpoint".to_string(),
            api_server_url(endpoint),
        ]);
        if !same_version(current, target) {
            args.push("--from".to_string());
            args.push(current.trim_start_matches('v').to_string());
        }
        args.extend([
            "--to".to_string(),
            target.trim_start_matches('v').to_string(),
            "--pre-pull-images=false".to_string(),
        ]);
        args
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput, TkupError> {
        debug!("Running: {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TkupError::unavailable(
                    "talosctl",
                    format!("failed to execute '{}': {e}. Is talosctl installed?", self.binary),
                )
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// One bounded reachability probe of the node's API.
    async fn probe(&self, endpoint: &str) -> bool {
        let args = self.version_args(endpoint);
        match tokio::time::timeout(self.probe_timeout, self.run(&args)).await {
            Ok(Ok(output)) => output.success,
            Ok(Err(e)) => {
                debug!(endpoint, error = %e, "Version probe failed");
                false
            }
            Err(_) => false,
        }
    }
}

fn same_version(a: &str, b: &str) -> bool {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a.compare(&b) == Comparison::Equal,
        _ => false,
    }
}

/// Kubernetes API URL served by a control-plane node address.
fn api_server_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}:6443")
    }
}

#[async_trait]
impl NodeUpgrader for Talosctl {
    async fn upgrade(&self, endpoint: &str, image_ref: &str) -> Result<(), TkupError> {
        let output = self.run(&self.upgrade_args(endpoint, image_ref)).await?;
        if !output.success {
            return Err(TkupError::UpgradeInitiationFailed {
                node: endpoint.to_string(),
                details: output.stderr,
            });
        }
        Ok(())
    }

    async fn await_healthy(&self, endpoint: &str, timeout: Duration) -> Result<(), TkupError> {
        let deadline = Instant::now() + timeout;

        tokio::time::sleep_until(deadline.min(Instant::now() + self.reboot_grace)).await;

        while Instant::now() < deadline {
            if self.probe(endpoint).await {
                debug!(endpoint, "Node is reachable again");
                return Ok(());
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + self.probe_interval)).await;
        }

        Err(TkupError::Timeout {
            operation: format!("node {endpoint} to come back online"),
            details: format!("not reachable after {}s", timeout.as_secs()),
        })
    }
}

#[async_trait]
impl WorkloadUpgrader for Talosctl {
    async fn upgrade(&self, endpoint: &str, current: &str, target: &str) -> Result<(), TkupError> {
        let output = self
            .run(&self.upgrade_k8s_args(endpoint, current, target))
            .await?;
        if !output.success {
            return Err(TkupError::UpgradeFailed {
                node: endpoint.to_string(),
                details: output.stderr,
            });
        }
        Ok(())
    }
}
