use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::ROLLBACK_RETENTION_DAYS;
use crate::core::UpdateError;
use crate::update::installer::{InstallStrategy, backup_path};
use crate::update::state::{UpdatePaths, load_json, remove_state_file, save_json};
use crate::utils::fs::remove_dir_logged;

/// Metadata describing a restorable previous binary.
///
/// Persisted as `updates/rollback.json` right after an install that moved
/// the previous executable to `<exe>.old`. The entry is only meaningful while
/// that backup file exists; [`RollbackManager::get_rollback_info`] deletes
/// metadata whose backup has disappeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackInfo {
    /// Version that the backup restores.
    pub version: String,
    pub backup_path: PathBuf,
    pub backup_time: DateTime<Utc>,
    /// The installed executable that would be replaced by a rollback.
    pub exe_path: PathBuf,
}

/// Outcome of a rollback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub success: bool,
    pub message: String,
    pub restored_version: String,
    pub needs_restart: bool,
}

impl RollbackResult {
    fn unavailable() -> Self {
        Self {
            success: false,
            message: "No rollback available".to_string(),
            restored_version: String::new(),
            needs_restart: false,
        }
    }
}

/// A deferred install whose backup does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PendingInstall {
    previous_version: String,
    exe_path: PathBuf,
    recorded_at: DateTime<Utc>,
    /// Download directory the install script copies from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    staging_dir: Option<PathBuf>,
}

/// Manages rollback metadata and restores the previous binary.
///
/// Every read-modify-write of `rollback.json` and `pending.json` happens
/// under the [`StateLock`](crate::update::state::StateLock).
///
/// # Examples
///
/// ```rust,no_run
/// use gateway_update::update::installer::InstallStrategy;
/// use gateway_update::update::rollback::RollbackManager;
/// use gateway_update::update::state::UpdatePaths;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let paths = UpdatePaths::new(Path::new("/home/me/.gateway"));
/// let manager = RollbackManager::new(paths, InstallStrategy::for_host());
///
/// if manager.can_rollback().await {
///     let result = manager.rollback().await?;
///     println!("{}", result.message);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RollbackManager {
    paths: UpdatePaths,
    strategy: InstallStrategy,
    retention: chrono::Duration,
}

impl RollbackManager {
    pub fn new(paths: UpdatePaths, strategy: InstallStrategy) -> Self {
        Self {
            paths,
            strategy,
            retention: chrono::Duration::try_days(ROLLBACK_RETENTION_DAYS)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Expire backups after `days` days instead of the default.
    ///
    /// Non-positive or out-of-range values keep the default retention.
    #[must_use]
    pub fn with_retention_days(mut self, days: i64) -> Self {
        match chrono::Duration::try_days(days).filter(|_| days > 0) {
            Some(retention) => self.retention = retention,
            None => warn!(days, "Ignoring invalid rollback retention"),
        }
        self
    }

    pub fn paths(&self) -> &UpdatePaths {
        &self.paths
    }

    pub fn strategy(&self) -> InstallStrategy {
        self.strategy
    }

    /// Record that `<exe>.old` restores `previous_version`.
    ///
    /// Fails with [`UpdateError::BackupMissing`] if the backup file is absent.
    pub async fn save_rollback_info(
        &self,
        previous_version: &str,
        exe: &Path,
    ) -> Result<RollbackInfo> {
        let _lock = self.paths.lock().await?;
        self.save_rollback_info_locked(previous_version, exe).await
    }

    async fn save_rollback_info_locked(
        &self,
        previous_version: &str,
        exe: &Path,
    ) -> Result<RollbackInfo> {
        let backup = backup_path(exe);
        if !backup.exists() {
            return Err(UpdateError::BackupMissing {
                path: backup.display().to_string(),
            }
            .into());
        }

        let info = RollbackInfo {
            version: previous_version.to_string(),
            backup_path: backup,
            backup_time: Utc::now(),
            exe_path: exe.to_path_buf(),
        };
        save_json(&self.paths.rollback_file(), &info).await?;
        info!(version = %info.version, backup = %info.backup_path.display(), "Saved rollback info");
        Ok(info)
    }

    /// Remember a deferred install until its backup appears.
    ///
    /// `staging_dir` is the download directory the script installs from; it
    /// is removed by [`finalize_pending`](Self::finalize_pending).
    pub async fn record_pending_install(
        &self,
        previous_version: &str,
        exe: &Path,
        staging_dir: Option<&Path>,
    ) -> Result<()> {
        let _lock = self.paths.lock().await?;
        let pending = PendingInstall {
            previous_version: previous_version.to_string(),
            exe_path: exe.to_path_buf(),
            recorded_at: Utc::now(),
            staging_dir: staging_dir.map(Path::to_path_buf),
        };
        save_json(&self.paths.pending_file(), &pending).await?;
        debug!(version = previous_version, "Recorded pending install");
        Ok(())
    }

    /// Turn a recorded pending install into rollback metadata.
    ///
    /// Returns the new [`RollbackInfo`] when the deferred install produced a
    /// backup. A pending record without a backup is dropped.
    pub async fn finalize_pending(&self) -> Result<Option<RollbackInfo>> {
        let _lock = self.paths.lock().await?;
        let pending_file = self.paths.pending_file();
        let Some(pending) = load_json::<PendingInstall>(&pending_file).await? else {
            return Ok(None);
        };

        let info = if backup_path(&pending.exe_path).exists() {
            Some(self.save_rollback_info_locked(&pending.previous_version, &pending.exe_path).await?)
        } else {
            warn!(
                exe = %pending.exe_path.display(),
                recorded = %pending.recorded_at,
                "Deferred install left no backup; dropping pending record"
            );
            None
        };

        if let Some(dir) = &pending.staging_dir {
            remove_dir_logged(dir, "deferred install download");
        }
        remove_state_file(&pending_file).await?;
        Ok(info)
    }

    /// Load the rollback metadata if a usable backup exists.
    ///
    /// Metadata pointing at a missing backup is deleted. Metadata older than
    /// the retention window is deleted together with its backup.
    pub async fn get_rollback_info(&self) -> Result<Option<RollbackInfo>> {
        let _lock = self.paths.lock().await?;
        self.load_valid_info().await
    }

    async fn load_valid_info(&self) -> Result<Option<RollbackInfo>> {
        let rollback_file = self.paths.rollback_file();
        let Some(info) = load_json::<RollbackInfo>(&rollback_file).await? else {
            return Ok(None);
        };

        if !info.backup_path.exists() {
            warn!(backup = %info.backup_path.display(), "Backup missing; removing stale rollback info");
            remove_state_file(&rollback_file).await?;
            return Ok(None);
        }

        if Utc::now() - info.backup_time > self.retention {
            info!(version = %info.version, "Rollback backup expired");
            if let Err(e) = remove_state_file(&info.backup_path).await {
                warn!(backup = %info.backup_path.display(), error = %e, "Failed to remove expired backup");
            }
            remove_state_file(&rollback_file).await?;
            return Ok(None);
        }

        Ok(Some(info))
    }

    /// Whether [`rollback`](Self::rollback) has something to restore.
    pub async fn can_rollback(&self) -> bool {
        match self.get_rollback_info().await {
            Ok(info) => info.is_some(),
            Err(e) => {
                warn!(error = %e, "Could not read rollback info");
                false
            }
        }
    }

    /// Forget the rollback metadata, keeping the backup file.
    pub async fn clear_rollback_info(&self) -> Result<()> {
        let _lock = self.paths.lock().await?;
        remove_state_file(&self.paths.rollback_file()).await
    }

    /// Delete the backup file and its metadata.
    pub async fn cleanup_backup(&self) -> Result<()> {
        let _lock = self.paths.lock().await?;
        let rollback_file = self.paths.rollback_file();
        if let Some(info) = load_json::<RollbackInfo>(&rollback_file).await? {
            remove_state_file(&info.backup_path).await?;
            info!(backup = %info.backup_path.display(), "Removed rollback backup");
        }
        remove_state_file(&rollback_file).await
    }

    /// Restore the previous binary.
    ///
    /// On success the rollback metadata and the health state are removed so
    /// the restored version starts with a clean slate and a second rollback
    /// cannot undo the first.
    pub async fn rollback(&self) -> Result<RollbackResult> {
        let _lock = self.paths.lock().await?;
        let Some(info) = self.load_valid_info().await? else {
            return Ok(RollbackResult::unavailable());
        };

        warn!(version = %info.version, exe = %info.exe_path.display(), "Rolling back");
        let result = self.strategy.rollback(&info).await?;

        remove_state_file(&self.paths.rollback_file()).await?;
        if let Err(e) = remove_state_file(&self.paths.health_file()).await {
            warn!(error = %e, "Failed to clear health state after rollback");
        }
        Ok(result)
    }
}
