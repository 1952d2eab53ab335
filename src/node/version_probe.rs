//! Version discovery for local binaries and the remote release.
//!
//! A version that cannot be determined is never an error here: every failure
//! collapses to `None`, which callers treat as older than any threshold.

use regex::Regex;
use semver::Version;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::release::ReleaseLocator;
use crate::constants::VERSION_PROBE_TIMEOUT;

static VERSION_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?").ok()
});

/// Extract the first semantic version token found in `text`.
///
/// ```rust
/// use nodekeeper_cli::node::version_probe::extract_version;
///
/// let v = extract_version("idena-node version 0.28.3\n").unwrap();
/// assert_eq!(v.to_string(), "0.28.3");
/// assert!(extract_version("no version here").is_none());
/// ```
pub fn extract_version(text: &str) -> Option<Version> {
    VERSION_TOKEN
        .as_ref()?
        .find_iter(text)
        .find_map(|m| Version::parse(m.as_str()).ok())
}

/// Run `<path> --version` and parse the first version token from stdout.
///
/// Returns `None` when the binary is missing, cannot be executed, prints no
/// version, or does not finish within `timeout` (the child is killed).
pub async fn probe_binary_version(path: &Path, timeout: Duration) -> Option<Version> {
    if !path.is_file() {
        debug!("No binary at {}, version unavailable", path.display());
        return None;
    }

    let child = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            debug!("Failed to run {} --version: {e}", path.display());
            return None;
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("Failed to read version output of {}: {e}", path.display());
            return None;
        }
        Err(_) => {
            debug!("{} --version timed out after {timeout:?}", path.display());
            return None;
        }
    };

    let version = extract_version(&String::from_utf8_lossy(&output.stdout));
    debug!(
        "{} --version exited with {:?}, parsed {:?}",
        path.display(),
        output.status.code(),
        version
    );
    version
}

/// Determines local and remote node versions.
#[derive(Debug, Clone)]
pub struct VersionProbe {
    locator: ReleaseLocator,
    timeout: Duration,
}

impl VersionProbe {
    /// Create a probe that resolves remote versions through `locator`.
    pub fn new(locator: ReleaseLocator) -> Self {
        Self {
            locator,
            timeout: VERSION_PROBE_TIMEOUT,
        }
    }

    /// Bound the duration of a local `--version` run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The release locator used for remote lookups.
    pub fn locator(&self) -> &ReleaseLocator {
        &self.locator
    }

    /// Version of the binary at `path`, or `None` if unavailable.
    pub async fn local_version(&self, path: &Path) -> Option<Version> {
        probe_binary_version(path, self.timeout).await
    }

    /// Latest published version, or `None` if the lookup failed.
    pub async fn remote_version(&self) -> Option<Version> {
        match self.locator.latest().await {
            Ok(release) => Some(release.version),
            Err(e) => {
                debug!("Remote version unavailable: {e}");
                None
            }
        }
    }
}
