use anyhow::Result;
use gateway_update::core::UpdateError;
use gateway_update::test_utils::{ReleaseServer, fake_binary, init_test_logging};
use gateway_update::update::{
    Asset, Channel, DownloadProgress, Downloader, GitHubReleases, Platform, ReleaseSource,
    UpdateChecker,
};
use std::sync::Mutex;
use tempfile::TempDir;

use super::{OWNER, REPO, latest_path, list_path, release_json};

async fn checker(server: &ReleaseServer, current: &str) -> Result<UpdateChecker<GitHubReleases>> {
    init_test_logging(None);
    let source = GitHubReleases::new(&server.base_url(), OWNER, REPO)?;
    Ok(UpdateChecker::new(source, current).with_platform(Platform::new("linux", "amd64")))
}

#[tokio::test]
async fn test_stable_channel_uses_latest_release() -> Result<()> {
    let server = ReleaseServer::start().await;
    server.set(&latest_path(), 200, release_json(&server, "v2.1.0", false, false).to_string());

    let info = checker(&server, "2.0.0").await?.check_for_updates().await?;
    assert!(info.available);
    assert_eq!(info.version, "2.1.0");
    assert_eq!(info.release_notes, "Notes for v2.1.0");
    assert!(info.download_url.ends_with("/assets/v2.1.0.tar.gz"));
    assert_eq!(server.requests(), vec![latest_path()]);
    Ok(())
}

#[tokio::test]
async fn test_prerelease_channel_takes_newest_non_draft() -> Result<()> {
    let server = ReleaseServer::start().await;
    let releases = serde_json::json!([
        release_json(&server, "v3.0.0", false, true),
        release_json(&server, "v3.0.0-beta.2", true, false),
        release_json(&server, "v2.1.0", false, false),
    ]);
    server.set(&list_path(), 200, releases.to_string());

    let checker = checker(&server, "2.1.0").await?;
    let info = checker.check_for_updates_on(Channel::Prerelease).await?;
    assert!(info.available);
    assert_eq!(info.version, "3.0.0-beta.2");

    let release = checker.source().fetch_latest(Channel::Prerelease).await?.unwrap();
    assert!(release.prerelease);
    assert_eq!(release.tag, "v3.0.0-beta.2");
    Ok(())
}

#[tokio::test]
async fn test_only_drafts_means_no_update() -> Result<()> {
    let server = ReleaseServer::start().await;
    let releases = serde_json::json!([release_json(&server, "v9.0.0", true, true)]);
    server.set(&list_path(), 200, releases.to_string());

    let info = checker(&server, "1.0.0").await?.check_for_updates_on(Channel::Prerelease).await?;
    assert!(!info.available);
    Ok(())
}

#[tokio::test]
async fn test_older_release_counts_as_update() -> Result<()> {
    let server = ReleaseServer::start().await;
    server.set(&latest_path(), 200, release_json(&server, "v1.9.0", false, false).to_string());

    let info = checker(&server, "2.0.0").await?.check_for_updates().await?;
    assert!(info.available);
    assert_eq!(info.version, "1.9.0");
    Ok(())
}

#[tokio::test]
async fn test_dev_build_never_updates() -> Result<()> {
    let server = ReleaseServer::start().await;
    server.set(&latest_path(), 200, release_json(&server, "v2.0.0", false, false).to_string());

    let info = checker(&server, "dev").await?.check_for_updates().await?;
    assert!(!info.available);
    Ok(())
}

#[tokio::test]
async fn test_malformed_feed_is_parse_error() -> Result<()> {
    let server = ReleaseServer::start().await;
    server.set(&latest_path(), 200, "<html>maintenance</html>");

    let err = checker(&server, "1.0.0").await?.check_for_updates().await.unwrap_err();
    assert!(matches!(err.downcast_ref::<UpdateError>(), Some(UpdateError::FeedParse { .. })));
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_feed_is_http_error() -> Result<()> {
    let server = ReleaseServer::start().await;
    server.set(&latest_path(), 403, r#"{"message":"API rate limit exceeded"}"#);

    let err = checker(&server, "1.0.0").await?.check_for_updates().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::Http { status: 403, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_download_reports_progress() -> Result<()> {
    let server = ReleaseServer::start().await;
    let payload = fake_binary("gateway 2.0.0", 256 * 1024);
    server.set("/assets/gateway", 200, payload.clone());

    let temp = TempDir::new()?;
    let downloader = Downloader::new()?.with_temp_root(temp.path().to_path_buf());
    let asset = Asset {
        name: "gateway".to_string(),
        download_url: server.url("/assets/gateway"),
        size: payload.len() as u64,
    };

    let seen = Mutex::new(Vec::<DownloadProgress>::new());
    let on_progress = |p: DownloadProgress| seen.lock().unwrap().push(p);
    let result = downloader.download(&asset, "2.0.0", Some(&on_progress)).await?;

    assert_eq!(std::fs::read(&result.path)?, payload);
    assert_eq!(result.version, "2.0.0");
    assert!(result.signature_path.is_none());

    let seen = seen.into_inner().unwrap();
    let last = seen.last().expect("progress reported");
    assert_eq!(last.total_bytes, payload.len() as u64);
    assert_eq!(last.downloaded_bytes, payload.len() as u64);
    assert_eq!(last.percent, 100.0);
    assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));

    result.cleanup();
    assert_eq!(std::fs::read_dir(temp.path())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_asset_leaves_nothing_behind() -> Result<()> {
    let server = ReleaseServer::start().await;
    let temp = TempDir::new()?;
    let downloader = Downloader::new()?.with_temp_root(temp.path().to_path_buf());
    let asset = Asset {
        name: "gateway".to_string(),
        download_url: server.url("/assets/missing"),
        size: 0,
    };

    let err = downloader.download(&asset, "2.0.0", None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::Http { status: 404, .. })
    ));
    assert_eq!(std::fs::read_dir(temp.path())?.count(), 0);
    Ok(())
}
