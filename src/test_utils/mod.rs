//! Test utilities for nodekeeper
//!
//! Helpers shared by unit tests and the integration suite:
//!
//! - [`init_test_logging`] wires `tracing` output into the test harness
//! - [`FakeNode`] writes a shell script that behaves like the node binary
//! - [`wait_for_line`] waits for a line of node output
//!
//! # Example
//!
//! ```rust,no_run
//! use nodekeeper_cli::test_utils::FakeNode;
//!
//! # fn example(dir: &std::path::Path) -> std::io::Result<()> {
//! FakeNode::new("1.2.0").ignoring_interrupts().write_to(&dir.join("idena-node"))?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::node::LogLine;

/// Line printed by [`FakeNode`] once its interrupt handler is installed.
pub const FAKE_NODE_READY: &str = "node ready";

/// File (relative to the node directory) receiving one line per interrupt.
pub const FAKE_NODE_INTERRUPT_LOG: &str = "interrupts.log";

/// File (relative to the node directory) receiving the launch arguments.
pub const FAKE_NODE_ARGS_FILE: &str = "args.txt";

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. `level` wins over `RUST_LOG`; with
/// neither set nothing is logged.
///
/// ```bash
/// RUST_LOG=nodekeeper_cli=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Record the interrupt and exit with 0.
    Graceful,
    /// Record the interrupt and keep running.
    IgnoreInterrupts,
    /// Exit with the given code right after printing its banner.
    ExitImmediately(i32),
}

/// A `/bin/sh` script standing in for the node binary.
///
/// With `--version` it prints `idena-node version <version>`. Otherwise it
/// writes its arguments to [`FAKE_NODE_ARGS_FILE`], prints a line to each
/// stream, prints [`FAKE_NODE_READY`] and idles until interrupted. Every
/// interrupt appends a line to [`FAKE_NODE_INTERRUPT_LOG`].
#[derive(Debug, Clone)]
pub struct FakeNode {
    version: String,
    behavior: Behavior,
}

impl FakeNode {
    /// A node reporting `version` that exits cleanly on interrupt.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            behavior: Behavior::Graceful,
        }
    }

    /// Keep running after an interrupt, so only a kill stops it.
    pub fn ignoring_interrupts(mut self) -> Self {
        self.behavior = Behavior::IgnoreInterrupts;
        self
    }

    /// Exit with `code` right after start.
    pub fn exiting_immediately(mut self, code: i32) -> Self {
        self.behavior = Behavior::ExitImmediately(code);
        self
    }

    /// The script text.
    pub fn script(&self) -> String {
        let mut script = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then\n\
             \x20 echo \"idena-node version {version}\"\n\
             \x20 exit 0\n\
             fi\n",
            version = self.version
        );

        match self.behavior {
            Behavior::Graceful => script.push_str(&format!(
                "trap 'echo interrupt >> {FAKE_NODE_INTERRUPT_LOG}; exit 0' INT\n"
            )),
            Behavior::IgnoreInterrupts => script.push_str(&format!(
                "trap 'echo interrupt >> {FAKE_NODE_INTERRUPT_LOG}' INT\n"
            )),
            Behavior::ExitImmediately(_) => {}
        }

        script.push_str(&format!(
            "echo \"$*\" > {FAKE_NODE_ARGS_FILE}\n\
             echo \"node {version} starting\"\n\
             echo \"node {version} warning\" >&2\n",
            version = self.version
        ));

        match self.behavior {
            Behavior::ExitImmediately(code) => script.push_str(&format!("exit {code}\n")),
            Behavior::Graceful | Behavior::IgnoreInterrupts => {
                script.push_str(&format!("echo \"{FAKE_NODE_READY}\"\n"));
                script.push_str("while true; do sleep 0.1; done\n");
            }
        }
        script
    }

    /// Write the script to `path` and make it executable.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.script())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }
}

/// Wait up to `timeout` for a line containing `needle`.
///
/// Returns `false` on timeout or when the sender is gone.
pub async fn wait_for_line(
    rx: &mut UnboundedReceiver<LogLine>,
    needle: &str,
    timeout: Duration,
) -> bool {
    tokio::time::timeout(timeout, async {
        while let Some(line) = rx.recv().await {
            if line.line.contains(needle) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false)
}
