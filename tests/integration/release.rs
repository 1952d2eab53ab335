//! Release lookup against a local release API.

use nodekeeper_cli::core::NodeError;
use nodekeeper_cli::node::VersionProbe;
use semver::Version;

use crate::common::{API_PATH, ASSET_PREFIX, ReleaseServer};

#[tokio::test]
async fn test_latest_selects_platform_asset() {
    let server = ReleaseServer::start().await;
    server.publish("v1.2.0", "binary");

    let release = server.locator().latest().await.unwrap();
    assert_eq!(release.version, Version::new(1, 2, 0));
    assert_eq!(release.asset_name, format!("{ASSET_PREFIX}-1.2.0"));
    assert_eq!(release.asset_url, server.asset_url(&release.asset_name));
}

#[tokio::test]
async fn test_missing_asset_is_reported() {
    let server = ReleaseServer::start().await;
    server.publish("v1.2.0", "binary");

    let err = server.locator().with_asset_prefix("idena-node-plan9").latest().await.unwrap_err();
    assert!(matches!(err, NodeError::ReleaseAssetNotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = ReleaseServer::start().await;
    server.publish("v1.2.0", "binary");
    server.set_api_status(Some(503));

    let err = server.locator().with_retries(3).latest().await.unwrap_err();
    assert!(matches!(err, NodeError::NetworkError { .. }), "{err:?}");
    assert_eq!(server.hits(API_PATH), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = ReleaseServer::start().await;
    server.set_api_status(Some(404));

    assert!(server.locator().with_retries(3).latest().await.is_err());
    assert_eq!(server.hits(API_PATH), 1);
}

#[tokio::test]
async fn test_remote_version_swallows_failures() {
    let server = ReleaseServer::start().await;
    let probe = VersionProbe::new(server.locator());

    server.set_api_status(Some(500));
    assert_eq!(probe.remote_version().await, None);

    server.set_api_status(None);
    server.publish("v0.19.0", "binary");
    assert_eq!(probe.remote_version().await, Some(Version::new(0, 19, 0)));
}
