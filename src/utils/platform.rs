//! Platform-specific helpers
//!
//! Small helpers that hide the differences between Windows, macOS and Linux
//! for the rest of the crate: executable naming, the release asset tag of the
//! host OS, home directory lookup and path expansion.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Returns the file name of an executable on the current platform.
///
/// Appends `.exe` on Windows and leaves the name untouched elsewhere.
///
/// ```rust
/// use nodekeeper_cli::utils::platform::executable_name;
///
/// let name = executable_name("idena-node");
/// if cfg!(windows) {
///     assert_eq!(name, "idena-node.exe");
/// } else {
///     assert_eq!(name, "idena-node");
/// }
/// ```
#[must_use]
pub fn executable_name(base: &str) -> String {
    format!("{base}{}", std::env::consts::EXE_SUFFIX)
}

/// Returns the OS tag used in release asset names.
///
/// Release assets are named `<binary>-<tag>-<version>[.exe]` where the tag is
/// one of three fixed values.
#[must_use]
pub const fn asset_os_tag() -> &'static str {
    if cfg!(windows) {
        "win"
    } else if cfg!(target_os = "macos") {
        "mac"
    } else {
        "linux"
    }
}

/// Returns the release asset name prefix for `binary` on the current platform.
#[must_use]
pub fn asset_prefix(binary: &str) -> String {
    format!("{binary}-{}", asset_os_tag())
}

/// Gets the home directory path for the current user.
pub fn get_home_dir() -> Result<PathBuf> {
    dirs::home_dir().context(
        "Could not determine home directory.\n\n\
        On Unix/Linux: Check that the HOME environment variable is set\n\
        On Windows: Check that the USERPROFILE environment variable is set",
    )
}

/// Expands `~` and environment variables in a path.
///
/// Both `$VAR`/`${VAR}` and a leading `~/` are supported via `shellexpand`.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .with_context(|| format!("Failed to expand environment variables in path: {path}"))?;
    Ok(PathBuf::from(expanded.into_owned()))
}
