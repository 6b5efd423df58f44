//! On-disk state of the update engine.
//!
//! Everything lives in the per-user `updates/` directory:
//!
//! ```text
//! updates/
//! ├── rollback.json     RollbackInfo, written after an install that made a backup
//! ├── health.json       HealthState, rewritten on every startup
//! ├── pending.json      deferred install awaiting its backup (Windows)
//! └── .locks/state.lock exclusive lock held around each read-modify-write
//! ```
//!
//! Two updater instances may run at once (the tray app and a CLI invocation),
//! so every read-modify-write of these files happens while holding a
//! [`StateLock`].

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};

use crate::constants::{
    HEALTH_FILE, MAX_BACKOFF_DELAY_MS, PENDING_FILE, ROLLBACK_FILE, STARTING_BACKOFF_DELAY_MS,
    STATE_LOCK_TIMEOUT,
};
use crate::core::UpdateError;
use crate::utils::fs::{atomic_write, remove_file_if_exists};

/// Locations of the update state files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePaths {
    updates_dir: PathBuf,
}

impl UpdatePaths {
    /// State rooted at `<home>/updates`.
    pub fn new(home: &Path) -> Self {
        Self {
            updates_dir: home.join("updates"),
        }
    }

    pub fn updates_dir(&self) -> &Path {
        &self.updates_dir
    }

    pub fn rollback_file(&self) -> PathBuf {
        self.updates_dir.join(ROLLBACK_FILE)
    }

    pub fn health_file(&self) -> PathBuf {
        self.updates_dir.join(HEALTH_FILE)
    }

    pub fn pending_file(&self) -> PathBuf {
        self.updates_dir.join(PENDING_FILE)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.updates_dir.join(".locks")
    }

    /// Take the exclusive state lock.
    pub async fn lock(&self) -> Result<StateLock> {
        StateLock::acquire(self, STATE_LOCK_TIMEOUT).await
    }
}

/// Exclusive, cross-process lock over the `updates/` state files.
///
/// Released when dropped.
#[derive(Debug)]
pub struct StateLock {
    _file: Arc<File>,
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock, retrying with exponential backoff until `timeout`.
    pub async fn acquire(paths: &UpdatePaths, timeout: Duration) -> Result<Self> {
        let locks_dir = paths.locks_dir();
        tokio::fs::create_dir_all(&locks_dir).await.with_context(|| {
            format!("Failed to create state locks directory: {}", locks_dir.display())
        })?;

        let lock_path = locks_dir.join("state.lock");
        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        let file = Arc::new(file);

        let start = std::time::Instant::now();
        let backoff = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let candidate = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || candidate.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            match locked {
                Ok(true) => {
                    debug!(
                        path = %lock_path.display(),
                        wait_ms = start.elapsed().as_millis(),
                        "State lock acquired"
                    );
                    return Ok(Self {
                        _file: file,
                        path: lock_path,
                    });
                }
                Ok(false) | Err(_) => {
                    let remaining = timeout.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        return Err(UpdateError::StateLockTimeout {
                            path: lock_path.display().to_string(),
                        }
                        .into());
                    }
                    tokio::time::sleep(delay.min(remaining)).await;
                }
            }
        }

        Err(UpdateError::StateLockTimeout {
            path: lock_path.display().to_string(),
        }
        .into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "State lock released");
    }
}

/// Load a JSON state file. A missing file is `None`; a corrupt one is
/// logged and treated as missing so a damaged file cannot wedge startup.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable state file");
            Ok(None)
        }
    }
}

/// Write a JSON state file atomically.
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || atomic_write(&path, &content))
        .await
        .context("spawn_blocking panicked")?
}

/// Delete a state file; missing is fine.
pub async fn remove_state_file(path: &Path) -> Result<()> {
    let path_buf = path.to_path_buf();
    tokio::task::spawn_blocking(move || remove_file_if_exists(&path_buf))
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to remove {}", path.display()))
}
