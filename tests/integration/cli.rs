//! The `nodekeeper` binary.

use assert_cmd::Command;
use assert_cmd::assert::OutputAssertExt;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Config pointing the node directory into `temp` and the release API at `api_url`.
fn write_config(temp: &Path, api_url: &str, extra_node: &str) -> PathBuf {
    let path = temp.join("config.toml");
    let content = format!(
        "[node]\n\
         dir = \"{}\"\n\
         {extra_node}\n\
         [release]\n\
         api_url = \"{api_url}\"\n\
         asset_prefix = \"{}\"\n\
         request_timeout = 5\n\
         retries = 1\n",
        temp.join("node").display(),
        crate::common::ASSET_PREFIX,
    );
    std::fs::write(&path, content).unwrap();
    path
}

fn nodekeeper(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nodekeeper").unwrap();
    cmd.arg("--config").arg(config).arg("--no-progress").env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("nodekeeper")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_path_honours_flag_and_env() {
    let temp = TempDir::new().unwrap();
    let flagged = temp.path().join("flag.toml");
    let from_env = temp.path().join("env.toml");

    Command::cargo_bin("nodekeeper")
        .unwrap()
        .args(["--config"])
        .arg(&flagged)
        .args(["config", "path"])
        .env("NODEKEEPER_CONFIG_PATH", &from_env)
        .assert()
        .success()
        .stdout(predicate::str::contains(flagged.display().to_string()));

    Command::cargo_bin("nodekeeper")
        .unwrap()
        .args(["config", "path"])
        .env("NODEKEEPER_CONFIG_PATH", &from_env)
        .assert()
        .success()
        .stdout(predicate::str::contains(from_env.display().to_string()));
}

#[test]
fn test_config_init_and_show() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("config.toml");

    nodekeeper(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config at:"));

    let written = std::fs::read_to_string(&path).unwrap();
    let key_line = written
        .lines()
        .find(|line| line.starts_with("api_key"))
        .expect("init writes an API key");
    let key = key_line.split('"').nth(1).unwrap();
    assert_eq!(key.len(), 32);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    nodekeeper(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), written);

    nodekeeper(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{}****", &key[..4])))
        .stdout(predicate::str::contains(key).not());
}

#[test]
fn test_invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[node]\nrpc_port = 0\n").unwrap();

    nodekeeper(&path)
        .args(["status", "--offline"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config"))
        .stderr(predicate::str::contains("node ports must be between 1 and 65535"));
}

#[test]
fn test_status_offline_without_binary() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "http://127.0.0.1:9/latest", "");

    nodekeeper(&config)
        .args(["status", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains(temp.path().join("node").display().to_string()))
        .stdout(predicate::str::contains("internal"))
        .stdout(predicate::str::contains("unavailable"))
        .stdout(predicate::str::contains("latest:").not());
}

#[test]
fn test_check_survives_unreachable_api() {
    let temp = TempDir::new().unwrap();
    // Nothing listens on port 9
    let config = write_config(temp.path(), "http://127.0.0.1:9/latest", "internal = false");

    nodekeeper(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("could not reach the release API"));
}

#[test]
fn test_check_skips_missing_binary() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "http://127.0.0.1:9/latest", "");

    nodekeeper(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("node binary not installed yet"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_installs_latest_release() {
    use nodekeeper_cli::test_utils::FakeNode;

    let server = crate::common::ReleaseServer::start().await;
    server.publish("v1.2.0", FakeNode::new("1.2.0").script());

    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), &server.api_url(), "");
    let node_dir = temp.path().join("node");

    let run = |args: &'static [&'static str]| {
        let config = config.clone();
        async move {
            tokio::task::spawn_blocking(move || nodekeeper(&config).args(args).output().unwrap())
                .await
                .unwrap()
                .assert()
        }
    };

    run(&["update"])
        .await
        .success()
        .stdout(predicate::str::contains("Node 1.2.0 installed"));
    assert!(node_dir.join("idena-node").exists());
    assert!(!node_dir.join("new-idena-node").exists());
    assert_eq!(server.asset_hits(), 1);

    run(&["update"])
        .await
        .success()
        .stdout(predicate::str::contains("already on the latest version"));
    assert_eq!(server.asset_hits(), 1);

    run(&["status"])
        .await
        .success()
        .stdout(predicate::str::is_match(r"active:\s+1\.2\.0").unwrap())
        .stdout(predicate::str::is_match(r"latest:\s+1\.2\.0").unwrap());
}
