use futures::future::BoxFuture;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::{SWAP_MAX_ATTEMPTS, SWAP_RETRY_PAUSE};
use crate::core::NodeError;

/// Deletes files on behalf of [`AtomicSwap`].
///
/// The production implementation is [`TokioRemover`]. Other implementations
/// can simulate a locked binary.
pub trait FileRemover: Send + Sync {
    /// Remove the file at `path`.
    fn remove<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>>;
}

/// Removes files with [`tokio::fs::remove_file`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRemover;

impl FileRemover for TokioRemover {
    fn remove<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(tokio::fs::remove_file(path))
    }
}

/// Replaces the active node binary with a fully downloaded staged one.
///
/// The active binary is deleted (retrying while the file is locked, as happens
/// on Windows while a process still maps it) and the staged file is renamed
/// into its place. If deletion keeps failing, the active binary is left
/// untouched.
#[derive(Clone)]
pub struct AtomicSwap {
    remover: Arc<dyn FileRemover>,
    max_attempts: u32,
    pause: Duration,
}

impl std::fmt::Debug for AtomicSwap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicSwap")
            .field("max_attempts", &self.max_attempts)
            .field("pause", &self.pause)
            .finish_non_exhaustive()
    }
}

impl Default for AtomicSwap {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicSwap {
    /// Swap using real filesystem deletion.
    pub fn new() -> Self {
        Self::with_remover(Arc::new(TokioRemover))
    }

    /// Swap using a custom deletion strategy.
    pub fn with_remover(remover: Arc<dyn FileRemover>) -> Self {
        Self {
            remover,
            max_attempts: SWAP_MAX_ATTEMPTS,
            pause: SWAP_RETRY_PAUSE,
        }
    }

    /// Set the pause between deletion attempts.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Number of deletion attempts before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Make `staged` the new `active` binary.
    ///
    /// # Process
    ///
    /// 1. Reject a missing `staged` file before touching anything
    /// 2. Delete `active` if present, up to [`max_attempts`](Self::max_attempts) times
    /// 3. Rename `staged` to `active`
    /// 4. Set mode `0755` on Unix
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::SwapError`] if the staged file is missing, the
    /// active binary could not be deleted, or the rename failed.
    pub async fn replace(&self, active: &Path, staged: &Path) -> Result<(), NodeError> {
        if !tokio::fs::try_exists(staged).await.unwrap_or(false) {
            return Err(swap_error(
                active,
                0,
                format!("staged binary {} does not exist", staged.display()),
            ));
        }

        self.remove_active(active).await?;

        tokio::fs::rename(staged, active)
            .await
            .map_err(|e| swap_error(active, 1, format!("rename failed: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(active, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| swap_error(active, 1, format!("failed to set permissions: {e}")))?;
        }

        info!("Installed {} as {}", staged.display(), active.display());
        Ok(())
    }

    async fn remove_active(&self, active: &Path) -> Result<(), NodeError> {
        let mut attempts = 0;

        loop {
            if !tokio::fs::try_exists(active).await.unwrap_or(false) {
                debug!("No active binary at {}, nothing to remove", active.display());
                return Ok(());
            }

            attempts += 1;
            match self.remover.remove(active).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) if attempts < self.max_attempts => {
                    warn!(
                        "Failed to remove {} (attempt {attempts}/{}): {e}. Retrying...",
                        active.display(),
                        self.max_attempts
                    );
                    tokio::time::sleep(self.pause).await;
                }
                Err(e) => {
                    return Err(swap_error(
                        active,
                        attempts,
                        format!("could not remove active binary: {e}"),
                    ));
                }
            }
        }
    }
}

fn swap_error(active: &Path, attempts: u32, reason: String) -> NodeError {
    NodeError::SwapError {
        path: active.display().to_string(),
        attempts,
        reason,
    }
}
