use anyhow::Result;
use chrono::{Duration, Utc};
use gateway_update::test_utils::{fake_binary, init_test_logging};
use gateway_update::update::installer::{backup_path, failed_path};
use gateway_update::update::{
    HealthMonitor, HealthSettings, InstallStrategy, RollbackManager, UpdatePaths,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Install {
    _temp: TempDir,
    exe: PathBuf,
    new_binary: PathBuf,
    paths: UpdatePaths,
    rollback: RollbackManager,
}

impl Install {
    fn new() -> Result<Self> {
        init_test_logging(None);
        let temp = TempDir::new()?;
        let exe = temp.path().join("gateway");
        std::fs::write(&exe, fake_binary("gateway 1.0.0", 2048))?;
        let new_binary = temp.path().join("staged-gateway");
        std::fs::write(&new_binary, fake_binary("gateway 2.0.0", 2048))?;

        let paths = UpdatePaths::new(&temp.path().join("home"));
        let rollback = RollbackManager::new(paths.clone(), InstallStrategy::InPlace);
        Ok(Self {
            _temp: temp,
            exe,
            new_binary,
            paths,
            rollback,
        })
    }

    async fn install_new_version(&self) -> Result<()> {
        let result = InstallStrategy::InPlace.install(&self.new_binary, &self.exe).await?;
        assert!(result.success, "{}", result.message);
        self.rollback.save_rollback_info("1.0.0", &self.exe).await?;
        Ok(())
    }

    fn monitor(&self, version: &str) -> HealthMonitor {
        HealthMonitor::new(
            self.paths.clone(),
            version,
            HealthSettings::default(),
            self.rollback.clone(),
        )
    }
}

fn starts_with(path: &Path, marker: &str) -> bool {
    std::fs::read(path).is_ok_and(|b| b.starts_with(marker.as_bytes()))
}

#[tokio::test]
async fn test_crash_loop_rolls_back_once() -> Result<()> {
    let install = Install::new()?;
    install.install_new_version().await?;
    assert!(starts_with(&install.exe, "gateway 2.0.0"));

    let monitor = install.monitor("2.0.0");
    let now = Utc::now();
    assert!(!monitor.record_startup_at(now).await?.should_rollback);
    assert!(!monitor.record_startup_at(now + Duration::seconds(5)).await?.should_rollback);
    let third = monitor.record_startup_at(now + Duration::seconds(10)).await?;
    assert!(third.should_rollback);
    assert!(!third.healthy);

    let result = install.rollback.rollback().await?;
    assert!(result.success);
    assert!(result.needs_restart);
    assert_eq!(result.restored_version, "1.0.0");
    assert!(starts_with(&install.exe, "gateway 1.0.0"));
    assert!(starts_with(&failed_path(&install.exe), "gateway 2.0.0"));
    assert!(!backup_path(&install.exe).exists());

    let again = install.rollback.rollback().await?;
    assert!(!again.success);
    assert_eq!(again.message, "No rollback available");
    Ok(())
}

#[tokio::test]
async fn test_slow_restarts_are_healthy() -> Result<()> {
    let install = Install::new()?;
    install.install_new_version().await?;

    let monitor = install.monitor("2.0.0");
    let start = Utc::now();
    for i in 0..5 {
        let result = monitor.record_startup_at(start + Duration::seconds(i * 40)).await?;
        assert_eq!(result.startup_count, 1);
        assert!(result.healthy);
    }
    Ok(())
}

#[tokio::test]
async fn test_crash_loop_without_backup_cannot_roll_back() -> Result<()> {
    let install = Install::new()?;
    install.install_new_version().await?;
    std::fs::remove_file(backup_path(&install.exe))?;

    let monitor = install.monitor("2.0.0");
    let now = Utc::now();
    let mut last = None;
    for i in 0..4 {
        last = Some(monitor.record_startup_at(now + Duration::seconds(i)).await?);
    }
    let last = last.unwrap();
    assert_eq!(last.startup_count, 4);
    assert!(!last.should_rollback);
    assert!(!install.paths.rollback_file().exists());
    Ok(())
}

#[tokio::test]
async fn test_mark_healthy_resets_history() -> Result<()> {
    let install = Install::new()?;
    install.install_new_version().await?;

    let monitor = install.monitor("2.0.0");
    let now = Utc::now();
    monitor.record_startup_at(now).await?;
    monitor.record_startup_at(now + Duration::seconds(1)).await?;
    monitor.mark_healthy().await?;

    let result = monitor.record_startup_at(now + Duration::seconds(2)).await?;
    assert_eq!(result.startup_count, 1);
    assert!(monitor.state().await?.unwrap().last_healthy.is_some());
    Ok(())
}

#[tokio::test]
async fn test_deferred_install_becomes_rollback_on_next_start() -> Result<()> {
    let install = Install::new()?;
    install.rollback.record_pending_install("1.0.0", &install.exe, None).await?;
    assert!(install.paths.pending_file().exists());
    assert!(!install.rollback.can_rollback().await);

    // What the install script does once the old process has exited.
    std::fs::rename(&install.exe, backup_path(&install.exe))?;
    std::fs::copy(&install.new_binary, &install.exe)?;

    let result = install.monitor("2.0.0").record_startup().await?;
    assert_eq!(result.startup_count, 1);
    assert!(!install.paths.pending_file().exists());

    let info = install.rollback.get_rollback_info().await?.unwrap();
    assert_eq!(info.version, "1.0.0");
    assert_eq!(info.exe_path, install.exe);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_startups_are_all_counted() -> Result<()> {
    let install = Install::new()?;
    let now = Utc::now();
    let first = install.monitor("2.0.0");
    let second = install.monitor("2.0.0");

    let (a, b) = tokio::join!(first.record_startup_at(now), second.record_startup_at(now));
    let mut counts = [a?.startup_count, b?.startup_count];
    counts.sort_unstable();
    assert_eq!(counts, [1, 2]);
    Ok(())
}

#[tokio::test]
async fn test_expired_backup_is_discarded() -> Result<()> {
    let install = Install::new()?;
    install.install_new_version().await?;

    let rollback_file = install.paths.rollback_file();
    let mut info: serde_json::Value = serde_json::from_slice(&std::fs::read(&rollback_file)?)?;
    info["backup_time"] = serde_json::json!((Utc::now() - Duration::days(45)).to_rfc3339());
    std::fs::write(&rollback_file, serde_json::to_vec(&info)?)?;

    assert!(install.rollback.get_rollback_info().await?.is_none());
    assert!(!backup_path(&install.exe).exists());
    assert!(!rollback_file.exists());
    Ok(())
}
