//! Launching and stopping fake node binaries.
#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nodekeeper_cli::core::NodeError;
use nodekeeper_cli::node::{LogLine, LogStream, NodeLaunchConfig, NodePaths, ProcessSupervisor};
use nodekeeper_cli::test_utils::{
    FAKE_NODE_ARGS_FILE, FAKE_NODE_INTERRUPT_LOG, FAKE_NODE_READY, FakeNode, wait_for_line,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

fn launch_config(dir: &std::path::Path) -> NodeLaunchConfig {
    let mut config = NodeLaunchConfig::new(NodePaths::new(dir, "idena-node"));
    config.rpc_port = 19009;
    config.api_key = Some("secret-key".to_string());
    config.stop_grace_period = Duration::from_secs(5);
    config
}

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new().with_probe_timeout(Duration::from_secs(5))
}

/// A node binary reporting version 1.2.0 that runs `body` when started.
fn write_node_script(path: &std::path::Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then\n  echo \"idena-node version 1.2.0\"\n  exit 0\nfi\n{body}\n"
    );
    std::fs::write(path, script).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn read(path: impl AsRef<std::path::Path>) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

#[tokio::test]
async fn test_start_without_binary_fails_without_side_effects() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());

    let err = supervisor().start(&config, |_: LogLine| {}).await.unwrap_err();

    assert!(matches!(err, NodeError::ProcessSpawnError { .. }), "{err:?}");
    assert!(!config.paths.data_dir().exists());
}

#[tokio::test]
async fn test_start_streams_and_logs_output() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    FakeNode::new("1.2.0").write_to(&config.paths.active_binary()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    let sink = {
        let seen = Arc::clone(&seen);
        move |line: LogLine| {
            seen.lock().unwrap().push(line.clone());
            let _ = tx.send(line);
        }
    };

    let supervisor = supervisor();
    let handle = supervisor.start(&config, sink).await.unwrap();
    assert!(wait_for_line(&mut rx, FAKE_NODE_READY, READY_TIMEOUT).await);
    supervisor.stop(&handle).await.unwrap();

    let output = read(config.paths.output_log());
    assert!(output.contains("node 1.2.0 starting"));
    assert!(output.contains(FAKE_NODE_READY));

    let errors = read(config.paths.error_log());
    assert!(errors.starts_with("-----------start ["), "{errors}");
    assert!(errors.contains("node 1.2.0 warning\n"));
    assert!(errors.trim_end().ends_with("-----------end-------------"));

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&LogLine {
        stream: LogStream::Stdout,
        line: "node 1.2.0 starting".to_string(),
    }));
    assert!(seen.contains(&LogLine {
        stream: LogStream::Stderr,
        line: "node 1.2.0 warning".to_string(),
    }));
}

#[tokio::test]
async fn test_arguments_passed_to_node() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    FakeNode::new("0.18.2").write_to(&config.paths.active_binary()).unwrap();
    std::fs::write(config.paths.config_file(), "{}").unwrap();

    let supervisor = supervisor();
    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    let handle = supervisor.start(&config, tx).await.unwrap();
    assert!(wait_for_line(&mut rx, FAKE_NODE_READY, READY_TIMEOUT).await);
    supervisor.stop(&handle).await.unwrap();

    let args = read(temp.path().join(FAKE_NODE_ARGS_FILE));
    let expected = format!(
        "--datadir {} --rpcport 19009 --port 40405 --ipfsport 40403 --apikey secret-key --config {}",
        config.paths.data_dir().display(),
        config.paths.config_file().display()
    );
    assert_eq!(args.trim_end(), expected);
}

#[tokio::test]
async fn test_old_node_does_not_receive_api_key() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    FakeNode::new("0.18.1").write_to(&config.paths.active_binary()).unwrap();

    let supervisor = supervisor();
    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    let handle = supervisor.start(&config, tx).await.unwrap();
    assert!(wait_for_line(&mut rx, FAKE_NODE_READY, READY_TIMEOUT).await);
    supervisor.stop(&handle).await.unwrap();

    let args = read(temp.path().join(FAKE_NODE_ARGS_FILE));
    assert!(!args.contains("--apikey"), "{args}");
    assert!(!args.contains("--config"), "{args}");
}

#[tokio::test]
async fn test_stop_interrupts_once() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    FakeNode::new("1.2.0").write_to(&config.paths.active_binary()).unwrap();

    let supervisor = supervisor();
    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    let handle = supervisor.start(&config, tx).await.unwrap();
    assert!(wait_for_line(&mut rx, FAKE_NODE_READY, READY_TIMEOUT).await);

    let message = supervisor.stop(&handle).await.unwrap();
    assert_eq!(message, format!("node process {} stopped with code 0", handle.pid()));
    assert!(handle.has_exited());
    assert_eq!(handle.exit_code(), Some(0));
    assert_eq!(read(temp.path().join(FAKE_NODE_INTERRUPT_LOG)).lines().count(), 1);
}

#[tokio::test]
async fn test_stop_after_exit_sends_no_signal() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    FakeNode::new("1.2.0").exiting_immediately(3).write_to(&config.paths.active_binary()).unwrap();

    let supervisor = supervisor();
    let handle = supervisor.start(&config, |_: LogLine| {}).await.unwrap();
    let code = tokio::time::timeout(READY_TIMEOUT, handle.wait_exit()).await.unwrap();
    assert_eq!(code, 3);

    let message = supervisor.stop(&handle).await.unwrap();
    assert_eq!(message, format!("node process {} already exited with code 3", handle.pid()));
    assert!(!temp.path().join(FAKE_NODE_INTERRUPT_LOG).exists());
}

#[tokio::test]
async fn test_stop_kills_node_ignoring_interrupt() {
    let temp = TempDir::new().unwrap();
    let mut config = launch_config(temp.path());
    config.stop_grace_period = Duration::from_millis(500);
    FakeNode::new("1.2.0").ignoring_interrupts().write_to(&config.paths.active_binary()).unwrap();

    let supervisor = supervisor();
    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    let handle = supervisor.start(&config, tx).await.unwrap();
    assert!(wait_for_line(&mut rx, FAKE_NODE_READY, READY_TIMEOUT).await);

    let message = supervisor.stop(&handle).await.unwrap();
    // SIGKILL
    assert_eq!(message, format!("node process {} killed with code 137", handle.pid()));
    assert_eq!(read(temp.path().join(FAKE_NODE_INTERRUPT_LOG)).lines().count(), 1);
}

#[tokio::test]
async fn test_exit_notifications_report_crash() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    FakeNode::new("1.2.0").exiting_immediately(2).write_to(&config.paths.active_binary()).unwrap();

    let handle = supervisor().start(&config, |_: LogLine| {}).await.unwrap();
    let mut exits = handle.exit_notifications();

    let code = tokio::time::timeout(READY_TIMEOUT, exits.wait_for(Option::is_some))
        .await
        .unwrap()
        .map(|code| *code)
        .unwrap();
    assert_eq!(code, Some(2));
}

#[tokio::test]
async fn test_invalid_utf8_output_does_not_break_the_pipe() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    write_node_script(
        &config.paths.active_binary(),
        "printf 'bad \\377\\n'\nsleep 0.3\necho after\nexit 0",
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    let handle = supervisor().start(&config, tx).await.unwrap();

    assert!(wait_for_line(&mut rx, "after", READY_TIMEOUT).await);
    let code = tokio::time::timeout(READY_TIMEOUT, handle.wait_exit()).await.unwrap();
    assert_eq!(code, 0);
    assert!(read(config.paths.output_log()).contains("after"));
}

#[tokio::test]
async fn test_exit_code_set_before_output_is_drained() {
    let temp = TempDir::new().unwrap();
    let config = launch_config(temp.path());
    // The background sleep keeps stdout open after the node itself exited
    write_node_script(&config.paths.active_binary(), "sleep 5 &\nexit 0");

    let supervisor = supervisor();
    let handle = supervisor.start(&config, |_: LogLine| {}).await.unwrap();

    let reaped = tokio::time::timeout(Duration::from_secs(1), async {
        while handle.exit_code().is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reaped.is_ok(), "exit code should not wait for the output to close");

    let message = supervisor.stop(&handle).await.unwrap();
    assert_eq!(message, format!("node process {} already exited with code 0", handle.pid()));
}
