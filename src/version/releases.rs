//! Release gating against upstream published versions.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Version;
use crate::cluster::Layer;
use crate::error::TkupError;
use crate::wait::{RetryPolicy, bounded};

/// Maximum number of stable versions kept per release family.
pub const MAX_STABLE_VERSIONS: usize = 5;

/// Lists currently available stable versions of a release family.
#[async_trait]
pub trait ReleaseIndex: Send + Sync {
    /// Stable versions for the layer, newest first.
    async fn available_versions(&self, layer: Layer) -> Result<Vec<Version>, TkupError>;
}

/// A published release as seen by a release index.
#[derive(Debug, Clone)]
pub struct ReleaseTag {
    pub tag: String,
    pub draft: bool,
    pub prerelease: bool,
}

/// Keep stable `v`-prefixed tags, deduplicated, newest first, capped at
/// [`MAX_STABLE_VERSIONS`].
pub fn filter_stable_versions<I>(tags: I) -> Vec<Version>
where
    I: IntoIterator<Item = ReleaseTag>,
{
    let mut versions: Vec<Version> = Vec::new();

    for release in tags {
        if release.draft || release.prerelease || !release.tag.starts_with('v') {
            continue;
        }
        let version = match Version::parse(&release.tag) {
            Ok(v) => v,
            Err(e) => {
                debug!(tag = %release.tag, error = %e, "Skipping invalid release tag");
                continue;
            }
        };
        if !versions.iter().any(|v| v.is_identical(&version)) {
            versions.push(version);
        }
    }

    versions.sort_by(|a, b| b.cmp(a));
    versions.truncate(MAX_STABLE_VERSIONS);
    versions
}

/// Fail with `NotYetReleased` unless `target` is among the stable versions
/// currently published for `layer`.
///
/// The index lookup is retried with `retry`; an empty list counts as a
/// failed attempt. Returns the available versions on success.
pub async fn validate_target_available(
    index: &dyn ReleaseIndex,
    layer: Layer,
    target: &str,
    retry: &RetryPolicy,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Version>, TkupError> {
    let target_version = Version::parse(target)?;
    let operation = format!("{layer} release index");
    let op = operation.as_str();

    let available = retry
        .run(cancel, op, move || async move {
            let versions = bounded(cancel, limit, op, index.available_versions(layer)).await?;
            if versions.is_empty() {
                return Err(TkupError::NoStableVersions(layer));
            }
            Ok(versions)
        })
        .await?;

    if available.iter().any(|v| v.is_identical(&target_version)) {
        info!(layer = %layer, target, "Target version is released");
        Ok(available)
    } else {
        Err(TkupError::NotYetReleased {
            layer,
            version: target.to_string(),
            available: available.iter().map(ToString::to_string).collect(),
        })
    }
}
