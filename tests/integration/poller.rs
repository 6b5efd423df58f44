use anyhow::Result;
use gateway_update::test_utils::{ReleaseServer, init_test_logging};
use gateway_update::update::{Channel, GitHubReleases, Poller, UpdateChecker, UpdateInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{OWNER, REPO, latest_path, list_path, release_json};

fn poller(server: &ReleaseServer, interval: Duration) -> Result<Poller<GitHubReleases>> {
    init_test_logging(None);
    let source = GitHubReleases::new(&server.base_url(), OWNER, REPO)?;
    Ok(Poller::new(UpdateChecker::new(source, "1.0.0"), interval, Duration::ZERO))
}

#[tokio::test]
async fn test_background_checks_report_updates_until_stopped() -> Result<()> {
    let server = ReleaseServer::start().await;
    server.set(&latest_path(), 200, release_json(&server, "v2.0.0", false, false).to_string());

    let poller = poller(&server, Duration::from_millis(50))?;
    let (tx, mut rx) = mpsc::unbounded_channel::<UpdateInfo>();
    assert!(poller.start(Arc::new(move |info: UpdateInfo| {
        let _ = tx.send(info);
    })));
    assert!(poller.is_running());

    for _ in 0..2 {
        let info = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await?
            .expect("callback fired");
        assert_eq!(info.version, "2.0.0");
    }

    poller.stop();
    assert!(!poller.is_running());
    while rx.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err(), "callback fired after stop");
    assert_eq!(poller.last_info().map(|i| i.version).as_deref(), Some("2.0.0"));
    Ok(())
}

#[tokio::test]
async fn test_failed_check_is_kept_until_next_success() -> Result<()> {
    let server = ReleaseServer::start().await;
    server.set(&latest_path(), 500, "oops");
    let poller = poller(&server, Duration::from_secs(3600))?;

    assert!(poller.check_now().await.is_err());
    assert!(poller.last_error().unwrap().contains("500"));
    assert!(poller.last_check().is_some());
    assert!(poller.last_info().is_none());

    server.set(&latest_path(), 200, release_json(&server, "v1.0.0", false, false).to_string());
    let info = poller.check_now().await?;
    assert!(!info.available);
    assert!(poller.last_error().is_none());
    assert_eq!(poller.last_info(), Some(info));
    Ok(())
}

#[tokio::test]
async fn test_channel_change_applies_to_next_check() -> Result<()> {
    let server = ReleaseServer::start().await;
    let releases = serde_json::json!([release_json(&server, "v1.1.0-rc.1", true, false)]);
    server.set(&list_path(), 200, releases.to_string());

    let poller = poller(&server, Duration::from_secs(3600))?;
    poller.set_channel(Channel::Prerelease);
    let info = poller.check_now().await?;

    assert!(info.available);
    assert_eq!(info.version, "1.1.0-rc.1");
    assert_eq!(server.requests(), vec![list_path()]);
    Ok(())
}

#[tokio::test]
async fn test_zero_interval_disables_polling() -> Result<()> {
    let server = ReleaseServer::start().await;
    let poller = poller(&server, Duration::ZERO)?;

    assert!(!poller.start(Arc::new(|_: UpdateInfo| {})));
    assert!(!poller.is_running());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.requests().is_empty());
    Ok(())
}
