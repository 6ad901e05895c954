//! Release index backed by the GitHub releases API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::Version;
use super::releases::{ReleaseIndex, ReleaseTag, filter_stable_versions};
use crate::cluster::Layer;
use crate::error::TkupError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("tkup/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

pub struct GitHubReleaseIndex {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl GitHubReleaseIndex {
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, TkupError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TkupError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Upstream repository publishing releases for the layer.
    pub fn repository(layer: Layer) -> &'static str {
        match layer {
            Layer::Talos => "siderolabs/talos",
            Layer::Kubernetes => "siderolabs/kubelet",
        }
    }

    fn releases_url(&self, layer: Layer) -> String {
        format!("{}/repos/{}/releases", self.base_url, Self::repository(layer))
    }
}

#[async_trait]
impl ReleaseIndex for GitHubReleaseIndex {
    async fn available_versions(&self, layer: Layer) -> Result<Vec<Version>, TkupError> {
        let url = self.releases_url(layer);
        debug!(url = %url, layer = %layer, "Fetching releases");

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TkupError::unavailable("github", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TkupError::unavailable(
                "github",
                format!("{url} returned status {status}"),
            ));
        }

        let releases: Vec<GitHubRelease> = response
            .json()
            .await
            .map_err(|e| TkupError::unavailable("github", format!("invalid response: {e}")))?;
        debug!(layer = %layer, total = releases.len(), "Fetched releases");

        let versions = filter_stable_versions(releases.into_iter().map(|r| ReleaseTag {
            tag: r.tag_name,
            draft: r.draft,
            prerelease: r.prerelease,
        }));
        if versions.is_empty() {
            return Err(TkupError::NoStableVersions(layer));
        }
        Ok(versions)
    }
}
