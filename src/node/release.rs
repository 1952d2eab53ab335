use reqwest::Client;
use semver::Version;
use serde::Deserialize;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_REQUEST_RETRIES, DEFAULT_REQUEST_TIMEOUT, MAX_BACKOFF_DELAY_MS,
    STARTING_BACKOFF_DELAY_MS,
};
use crate::core::NodeError;
use crate::utils::platform::asset_prefix;

const RELEASE_LOOKUP: &str = "release lookup";
const RELEASE_PARSING: &str = "release parsing";

/// Metadata of the latest published node release for this platform.
///
/// Produced fresh by every [`ReleaseLocator::latest`] call and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Release version parsed from the tag (a leading `v` is ignored).
    pub version: Version,
    /// Download URL of the platform asset.
    pub asset_url: String,
    /// Name of the matched asset.
    pub asset_name: String,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

/// Resolves the latest node release from a GitHub-style release API.
///
/// The locator is stateless: each [`latest`](Self::latest) call performs a
/// fresh GET against the API, parses the version tag and picks the asset whose
/// name starts with the platform prefix (`<binary>-win`, `<binary>-mac` or
/// `<binary>-linux`).
///
/// Requests are bounded by a timeout and retried with exponential backoff when
/// the failure is a transport error or a server-side status.
///
/// # Examples
///
/// ```rust,no_run
/// use nodekeeper_cli::node::{ReleaseLocator, http_client};
///
/// # async fn example() -> anyhow::Result<()> {
/// let locator = ReleaseLocator::new(
///     http_client()?,
///     "https://api.github.com/repos/idena-network/idena-go/releases/latest",
///     "idena-node",
/// );
/// let release = locator.latest().await?;
/// println!("{} -> {}", release.version, release.asset_url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReleaseLocator {
    client: Client,
    api_url: String,
    asset_prefix: String,
    request_timeout: Duration,
    retries: usize,
}

impl ReleaseLocator {
    /// Create a locator for `binary_name` assets published at `api_url`.
    pub fn new(client: Client, api_url: impl Into<String>, binary_name: &str) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            asset_prefix: asset_prefix(binary_name),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retries: DEFAULT_REQUEST_RETRIES,
        }
    }

    /// Override the asset name prefix chosen for the host platform.
    pub fn with_asset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.asset_prefix = prefix.into();
        self
    }

    /// Set the timeout of a single API request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the total number of attempts per lookup (at least one).
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// The asset name prefix this locator matches.
    pub fn asset_prefix(&self) -> &str {
        &self.asset_prefix
    }

    /// The release API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Query the release API for the latest version and its platform asset.
    ///
    /// # Errors
    ///
    /// - [`NodeError::NetworkError`] if the API is unreachable, answers with a
    ///   non-success status, or returns an unreadable body
    /// - [`NodeError::ReleaseAssetNotFound`] if no asset matches the platform
    pub async fn latest(&self) -> Result<ReleaseInfo, NodeError> {
        let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .factor(2)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
            .take(self.retries.saturating_sub(1));

        let release = RetryIf::spawn(
            strategy,
            || self.fetch_release(),
            |e: &NodeError| {
                let retry = is_retriable(e);
                if retry {
                    warn!("Release lookup failed, retrying: {e}");
                }
                retry
            },
        )
        .await?;

        select_asset(release, &self.asset_prefix)
    }

    async fn fetch_release(&self) -> Result<GithubRelease, NodeError> {
        debug!("Fetching latest release from {}", self.api_url);

        let response = self
            .client
            .get(&self.api_url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| NodeError::network(RELEASE_LOOKUP, e))?;

        let status = response.status();
        if !status.is_success() {
            let operation = if status.is_server_error() { RELEASE_LOOKUP } else { RELEASE_PARSING };
            return Err(NodeError::network(
                operation,
                format!("{} returned status {status}", self.api_url),
            ));
        }

        response
            .json::<GithubRelease>()
            .await
            .map_err(|e| NodeError::network(RELEASE_PARSING, e))
    }
}

fn is_retriable(error: &NodeError) -> bool {
    matches!(error, NodeError::NetworkError { operation, .. } if operation == RELEASE_LOOKUP)
}

/// Parse a release tag such as `v1.2.0` or `1.2.0` into a version.
pub fn parse_tag(tag: &str) -> Option<Version> {
    Version::parse(tag.trim().trim_start_matches('v')).ok()
}

fn select_asset(release: GithubRelease, prefix: &str) -> Result<ReleaseInfo, NodeError> {
    let version = parse_tag(&release.tag_name).ok_or_else(|| {
        NodeError::network(RELEASE_PARSING, format!("invalid version tag '{}'", release.tag_name))
    })?;

    let asset = release
        .assets
        .into_iter()
        .find(|asset| asset.name.starts_with(prefix))
        .ok_or_else(|| NodeError::ReleaseAssetNotFound {
            prefix: prefix.to_string(),
            version: version.to_string(),
        })?;

    debug!("Latest release {version}: {}", asset.name);
    Ok(ReleaseInfo {
        version,
        asset_url: asset.browser_download_url,
        asset_name: asset.name,
    })
}
