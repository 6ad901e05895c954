//! Kubernetes client builder with kubeconfig path and context support.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::TkupError;

/// Build a Kubernetes client.
///
/// Reads the given kubeconfig file when provided, otherwise the default
/// kubeconfig resolution (`KUBECONFIG`, `~/.kube/config`, in-cluster) applies.
pub async fn build_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<kube::Client> {
    let options = kube::config::KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };

    let config = match kubeconfig {
        Some(path) => {
            debug!("Using kubeconfig file: {}", path.display());
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| TkupError::Config(format!("kubeconfig {}: {}", path.display(), e)))?
        }
        None if context.is_some() => {
            debug!("Using kubeconfig context: {:?}", context);
            kube::Config::from_kubeconfig(&options)
                .await
                .map_err(|e| TkupError::Config(format!("context {:?}: {}", context, e)))?
        }
        None => {
            debug!("Using default kubeconfig context");
            kube::Config::infer()
                .await
                .map_err(|e| TkupError::Config(e.to_string()))?
        }
    };

    let client = kube::Client::try_from(config).context("Failed to build Kubernetes client")?;
    Ok(client)
}

/// Get the context name that will be used for display.
pub fn current_context(kubeconfig: Option<&Path>, context: Option<&str>) -> String {
    if let Some(ctx) = context {
        return ctx.to_string();
    }

    let kubeconfig = match kubeconfig {
        Some(path) => kube::config::Kubeconfig::read_from(path).ok(),
        None => kube::config::Kubeconfig::read().ok(),
    };

    kubeconfig
        .and_then(|kc| kc.current_context)
        .unwrap_or_else(|| "in-cluster".to_string())
}
