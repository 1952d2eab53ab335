//! Update cycles end to end: release API, download, swap and events.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use nodekeeper_cli::node::{
    AtomicSwap, CycleOutcome, NodePaths, UpdateEvent, UpdateStage, version_probe,
};
use nodekeeper_cli::test_utils::FakeNode;
use semver::Version;
use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::common::{API_PATH, LockedRemover, ReleaseServer};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn drain(rx: &mut broadcast::Receiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count(events: &[UpdateEvent], pred: impl Fn(&UpdateEvent) -> bool) -> usize {
    events.iter().filter(|event| pred(event)).count()
}

/// Node directory with version `installed` active and `published` on the server.
async fn setup(installed: &str, published: &str) -> (ReleaseServer, TempDir, NodePaths) {
    let server = ReleaseServer::start().await;
    server.publish(&format!("v{published}"), FakeNode::new(published).script());

    let temp = TempDir::new().unwrap();
    let paths = NodePaths::new(temp.path(), "idena-node");
    FakeNode::new(installed).write_to(&paths.active_binary()).unwrap();
    (server, temp, paths)
}

#[tokio::test]
async fn test_external_node_only_announces() {
    let server = ReleaseServer::start().await;
    server.publish("v1.2.0", FakeNode::new("1.2.0").script());
    let temp = TempDir::new().unwrap();

    let orchestrator = server
        .orchestrator(temp.path())
        .manages_internal_node(false)
        .current_version(Some(Version::new(1, 1, 0)))
        .build();
    let mut rx = orchestrator.subscribe();

    let outcome = orchestrator.check_now().await;
    assert_eq!(outcome, CycleOutcome::UpdateAvailable(Version::new(1, 2, 0)));

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![UpdateEvent::UpdateAvailable {
            version: Version::new(1, 2, 0)
        }]
    );
    assert_eq!(server.asset_hits(), 0);
    assert_eq!(orchestrator.state(), UpdateStage::UpdateAvailable);
}

#[tokio::test]
async fn test_update_is_downloaded_and_swapped() {
    let (server, _temp, paths) = setup("1.1.0", "1.2.0").await;
    let orchestrator = server.orchestrator(paths.node_dir()).build();
    let mut rx = orchestrator.subscribe();

    let outcome = orchestrator.check_now().await;
    assert_eq!(outcome, CycleOutcome::Installed(Version::new(1, 2, 0)));

    let active = version_probe::probe_binary_version(&paths.active_binary(), PROBE_TIMEOUT).await;
    assert_eq!(active, Some(Version::new(1, 2, 0)));
    assert!(!paths.staged_binary().exists());
    assert_eq!(orchestrator.current_version(), Some(Version::new(1, 2, 0)));
    assert_eq!(orchestrator.state(), UpdateStage::Swapped);
    assert!(!orchestrator.is_downloading());

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(UpdateEvent::UpdateAvailable { .. })));
    assert!(matches!(events.last(), Some(UpdateEvent::UpdateDownloaded { .. })));
    assert_eq!(count(&events, |e| matches!(e, UpdateEvent::UpdateAvailable { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, UpdateEvent::UpdateDownloaded { .. })), 1);
    assert!(count(&events, |e| matches!(e, UpdateEvent::DownloadProgress(_))) >= 1);

    // The next cycle finds nothing to do
    assert_eq!(orchestrator.check_now().await, CycleOutcome::UpToDate);
    assert_eq!(server.asset_hits(), 1);
}

#[tokio::test]
async fn test_up_to_date_node_is_left_alone() {
    let (server, _temp, paths) = setup("1.2.0", "1.2.0").await;
    let orchestrator = server.orchestrator(paths.node_dir()).build();
    let mut rx = orchestrator.subscribe();

    assert_eq!(orchestrator.check_now().await, CycleOutcome::UpToDate);
    assert!(drain(&mut rx).is_empty());
    assert_eq!(server.asset_hits(), 0);
    assert_eq!(orchestrator.current_version(), Some(Version::new(1, 2, 0)));
}

#[tokio::test]
async fn test_concurrent_checks_share_one_download() {
    let (server, _temp, paths) = setup("1.1.0", "1.2.0").await;
    server.set_asset_delay(Duration::from_millis(300));
    let orchestrator = server.orchestrator(paths.node_dir()).build();
    let mut rx = orchestrator.subscribe();

    let other = orchestrator.clone();
    let (first, second) = tokio::join!(orchestrator.check_now(), other.check_now());

    assert_eq!(first, CycleOutcome::Installed(Version::new(1, 2, 0)));
    assert_eq!(second, CycleOutcome::Installed(Version::new(1, 2, 0)));
    assert_eq!(server.asset_hits(), 1);

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, UpdateEvent::UpdateDownloaded { .. })), 1);
}

#[tokio::test]
async fn test_locked_binary_fails_update_and_keeps_node() {
    let (server, _temp, paths) = setup("1.1.0", "1.2.0").await;
    let remover = Arc::new(LockedRemover::default());
    let orchestrator = server
        .orchestrator(paths.node_dir())
        .swap(AtomicSwap::with_remover(remover.clone()).with_pause(Duration::from_millis(5)))
        .build();
    let mut rx = orchestrator.subscribe();

    let outcome = orchestrator.check_now().await;
    assert!(matches!(outcome, CycleOutcome::Failed(_)), "{outcome:?}");
    assert_eq!(remover.calls(), 5);
    assert_eq!(orchestrator.state(), UpdateStage::Failed);

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        UpdateEvent::UpdateFailed { version, .. } if *version == Version::new(1, 2, 0)
    )));
    assert_eq!(count(&events, |e| matches!(e, UpdateEvent::UpdateDownloaded { .. })), 0);

    // The running node's binary is intact and still executable
    let active = version_probe::probe_binary_version(&paths.active_binary(), PROBE_TIMEOUT).await;
    assert_eq!(active, Some(Version::new(1, 1, 0)));
    assert!(paths.staged_binary().exists());
}

#[tokio::test]
async fn test_download_from_failed_swap_is_reused() {
    let (server, _temp, paths) = setup("1.1.0", "1.2.0").await;

    let locked = server
        .orchestrator(paths.node_dir())
        .swap(
            AtomicSwap::with_remover(Arc::new(LockedRemover::default()))
                .with_pause(Duration::from_millis(5)),
        )
        .build();
    assert!(matches!(locked.check_now().await, CycleOutcome::Failed(_)));
    assert_eq!(server.asset_hits(), 1);

    let orchestrator = server.orchestrator(paths.node_dir()).build();
    assert_eq!(orchestrator.check_now().await, CycleOutcome::Installed(Version::new(1, 2, 0)));
    assert_eq!(server.asset_hits(), 1);

    let active = version_probe::probe_binary_version(&paths.active_binary(), PROBE_TIMEOUT).await;
    assert_eq!(active, Some(Version::new(1, 2, 0)));
}

#[tokio::test]
async fn test_staged_binary_is_reused() {
    let (server, _temp, paths) = setup("1.1.0", "1.2.0").await;
    FakeNode::new("1.2.0").write_to(&paths.staged_binary()).unwrap();

    let orchestrator = server.orchestrator(paths.node_dir()).build();
    let mut rx = orchestrator.subscribe();

    assert_eq!(orchestrator.check_now().await, CycleOutcome::Installed(Version::new(1, 2, 0)));
    assert_eq!(server.asset_hits(), 0);

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, UpdateEvent::DownloadProgress(_))), 0);
    assert_eq!(count(&events, |e| matches!(e, UpdateEvent::UpdateDownloaded { .. })), 1);
}

#[tokio::test]
async fn test_outdated_staged_binary_is_replaced() {
    let (server, _temp, paths) = setup("1.1.0", "1.2.0").await;
    FakeNode::new("1.1.5").write_to(&paths.staged_binary()).unwrap();

    let orchestrator = server.orchestrator(paths.node_dir()).build();
    assert_eq!(orchestrator.check_now().await, CycleOutcome::Installed(Version::new(1, 2, 0)));
    assert_eq!(server.asset_hits(), 1);

    let active = version_probe::probe_binary_version(&paths.active_binary(), PROBE_TIMEOUT).await;
    assert_eq!(active, Some(Version::new(1, 2, 0)));
}

#[tokio::test]
async fn test_missing_binary_skips_network() {
    let server = ReleaseServer::start().await;
    server.publish("v1.2.0", FakeNode::new("1.2.0").script());
    let temp = TempDir::new().unwrap();

    let orchestrator = server.orchestrator(temp.path()).build();
    assert_eq!(orchestrator.check_now().await, CycleOutcome::Skipped);
    assert_eq!(server.hits(API_PATH), 0);
}

#[tokio::test]
async fn test_install_release_performs_first_install() {
    let server = ReleaseServer::start().await;
    server.publish("v1.2.0", FakeNode::new("1.2.0").script());
    let temp = TempDir::new().unwrap();
    let paths = NodePaths::new(temp.path(), "idena-node");

    let release = server.locator().latest().await.unwrap();
    let orchestrator = server.orchestrator(temp.path()).build();

    let outcome = orchestrator.install_release(release).await;
    assert_eq!(outcome, CycleOutcome::Installed(Version::new(1, 2, 0)));

    let active = version_probe::probe_binary_version(&paths.active_binary(), PROBE_TIMEOUT).await;
    assert_eq!(active, Some(Version::new(1, 2, 0)));
}

#[tokio::test]
async fn test_loop_survives_api_failures() {
    let (server, _temp, paths) = setup("1.1.0", "1.2.0").await;
    server.set_api_status(Some(500));

    let orchestrator =
        server.orchestrator(paths.node_dir()).interval(Duration::from_millis(50)).build();
    let mut rx = orchestrator.subscribe();
    let updates = orchestrator.spawn();

    let failing = tokio::time::timeout(Duration::from_secs(10), async {
        while server.hits(API_PATH) < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(failing.is_ok(), "loop stopped cycling after API failures");
    assert!(!updates.is_finished());

    server.set_api_status(None);
    let downloaded = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(UpdateEvent::UpdateDownloaded { version }) => break Some(version),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break None,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(downloaded, Some(Version::new(1, 2, 0)));

    updates.cancel();
    tokio::time::timeout(Duration::from_secs(5), updates.join()).await.unwrap();
    assert_eq!(server.asset_hits(), 1);
}
