//! CLI arguments and upgrade configuration file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

use crate::cluster::NodeRole;
use crate::error::TkupError;
use crate::upgrade::Timings;
use crate::version::compare;
use crate::version::github::DEFAULT_API_URL;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

pub const CONFIG_FILE_NAME: &str = "tkup.yaml";

/// Talos Linux and Kubernetes phased cluster upgrade CLI tool.
///
/// Upgrades Talos nodes and then Kubernetes, one node at a time, ordered by
/// role, gated on the target versions being released upstream.
#[derive(Parser, Debug, Clone)]
#[command(name = "tkup")]
#[command(about = "Talos Linux and Kubernetes phased cluster upgrade CLI tool")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Upgrade configuration file (default: ./tkup.yaml, ~/.tkup/tkup.yaml, /etc/tkup/tkup.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Path to talosconfig file
    #[arg(long, env = "TALOSCONFIG")]
    pub talosconfig: Option<PathBuf>,

    /// Report what would be upgraded without changing anything
    #[arg(long, default_value = "false")]
    pub check_only: bool,

    /// Override the Talos upgrade order from the config file
    #[arg(long, value_enum)]
    pub talos_upgrade_order: Option<UpgradeOrder>,

    /// Override the Kubernetes upgrade order from the config file
    #[arg(long = "k8s-upgrade-order", value_enum)]
    pub k8s_upgrade_order: Option<UpgradeOrder>,

    /// Skip the confirmation prompt
    #[arg(short, long, default_value = "false")]
    pub yes: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TKUP_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "TKUP_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// GitHub token for release lookups (raises the API rate limit)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Base URL of the GitHub API used for release lookups
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub release_index_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Order in which role groups are upgraded within a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeOrder {
    #[default]
    ControlPlaneFirst,
    WorkersFirst,
}

impl UpgradeOrder {
    pub fn roles(self) -> [NodeRole; 2] {
        match self {
            Self::ControlPlaneFirst => [NodeRole::ControlPlane, NodeRole::Worker],
            Self::WorkersFirst => [NodeRole::Worker, NodeRole::ControlPlane],
        }
    }
}

impl fmt::Display for UpgradeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlaneFirst => write!(f, "control-plane-first"),
            Self::WorkersFirst => write!(f, "workers-first"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalosTarget {
    pub version: String,
    pub image_id: String,
    pub order: UpgradeOrder,
}

impl TalosTarget {
    /// Installer image handed to each node, `{imageId}:{version}`.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image_id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesTarget {
    pub version: String,
    pub order: UpgradeOrder,
}

/// Validated per-layer targets. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeConfig {
    pub talos: TalosTarget,
    pub kubernetes: KubernetesTarget,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TalosSection {
    #[serde(default)]
    version: String,
    #[serde(default)]
    image_id: String,
    upgrade_order: Option<UpgradeOrder>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubernetesSection {
    #[serde(default)]
    version: String,
    upgrade_order: Option<UpgradeOrder>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeoutSection {
    node_health_minutes: Option<u64>,
    monitor_minutes: Option<u64>,
    stabilization_seconds: Option<u64>,
    inter_node_delay_seconds: Option<u64>,
}

/// Upgrade configuration file as written by the operator.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    talos: TalosSection,
    #[serde(default, alias = "k8s")]
    kubernetes: KubernetesSection,
    #[serde(default)]
    timeouts: TimeoutSection,
}

impl ConfigFile {
    /// Load the configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML from {}", path.display()))?;

        Ok(config)
    }

    /// Validate targets and apply order overrides.
    pub fn upgrade_config(
        &self,
        talos_order: Option<UpgradeOrder>,
        kubernetes_order: Option<UpgradeOrder>,
    ) -> Result<UpgradeConfig, TkupError> {
        let talos_version = self.talos.version.trim();
        let image_id = self.talos.image_id.trim();
        let kubernetes_version = self.kubernetes.version.trim();

        if talos_version.is_empty() {
            return Err(TkupError::Config("talos.version is required".to_string()));
        }
        if image_id.is_empty() {
            return Err(TkupError::Config("talos.imageId is required".to_string()));
        }
        if kubernetes_version.is_empty() {
            return Err(TkupError::Config(
                "kubernetes.version is required".to_string(),
            ));
        }
        compare::validate(talos_version)?;
        compare::validate(kubernetes_version)?;

        Ok(UpgradeConfig {
            talos: TalosTarget {
                version: talos_version.to_string(),
                image_id: image_id.to_string(),
                order: talos_order.or(self.talos.upgrade_order).unwrap_or_default(),
            },
            kubernetes: KubernetesTarget {
                version: kubernetes_version.to_string(),
                order: kubernetes_order
                    .or(self.kubernetes.upgrade_order)
                    .unwrap_or_default(),
            },
        })
    }

    /// Production timings with the file's overrides applied.
    pub fn timings(&self) -> Timings {
        let mut timings = Timings::default();
        let t = &self.timeouts;

        if let Some(m) = t.node_health_minutes {
            timings.health_timeout = Duration::from_secs(m * 60);
        }
        if let Some(m) = t.monitor_minutes {
            timings.monitor_timeout = Duration::from_secs(m * 60);
        }
        if let Some(s) = t.stabilization_seconds {
            timings.talos_group_stabilization = Duration::from_secs(s);
            timings.kubernetes_group_stabilization = Duration::from_secs(s);
            timings.layer_stabilization = Duration::from_secs(s);
        }
        if let Some(s) = t.inter_node_delay_seconds {
            timings.inter_node_delay = Duration::from_secs(s);
        }
        timings
    }
}

/// Application configuration derived from CLI args and the config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub upgrade: UpgradeConfig,
    pub timings: Timings,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub talosconfig: Option<PathBuf>,
    pub check_only: bool,
    pub yes: bool,
    pub github_token: Option<SecretString>,
    pub release_index_url: String,
}

impl Config {
    /// Resolve and load the config file, then merge CLI overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let config_path = resolve_config_path(args.config.as_deref(), home.as_deref())?;
        debug!("Using config file: {}", config_path.display());

        let file = ConfigFile::load(&config_path)?;
        let upgrade = file
            .upgrade_config(args.talos_upgrade_order, args.k8s_upgrade_order)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;

        Ok(Self {
            timings: file.timings(),
            config_path,
            upgrade,
            kubeconfig: args.kubeconfig.clone(),
            context: args.context.clone(),
            talosconfig: args.talosconfig.clone(),
            check_only: args.check_only,
            yes: args.yes,
            github_token: args.github_token.clone().map(SecretString::from),
            release_index_url: args.release_index_url.clone(),
        })
    }
}

/// Default config file locations, in search order.
pub fn default_config_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(home) = home {
        paths.push(home.join(".tkup").join(CONFIG_FILE_NAME));
    }
    paths.push(Path::new("/etc/tkup").join(CONFIG_FILE_NAME));
    paths
}

fn resolve_config_path(explicit: Option<&Path>, home: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let candidates = default_config_paths(home);
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
            TkupError::Config(format!(
                "no config file found (searched: {})",
                searched.join(", ")
            ))
            .into()
        })
}
