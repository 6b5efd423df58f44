//! Replacing the running executable with a prepared update.
//!
//! Two strategies exist. [`InstallStrategy::InPlace`] renames the running
//! binary to `<exe>.old` and copies the new one into its slot; Unix-like
//! systems allow this while the old image keeps running. Windows locks the
//! file of a running executable, so [`InstallStrategy::DeferredScript`]
//! writes a batch script that waits for this process to exit and performs
//! the same swap afterwards.
//!
//! Both strategies leave `<exe>.old` behind whenever a previous binary
//! existed. That file is the only thing a rollback can restore.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::constants::{BACKUP_SUFFIX, FAILED_SUFFIX};
use crate::core::UpdateError;
use crate::update::rollback::{RollbackInfo, RollbackResult};
use crate::utils::fs::{remove_file_if_exists, set_executable, with_suffix};

/// Outcome of one install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallResult {
    pub success: bool,
    pub message: String,
    pub needs_restart: bool,
    /// Executable to relaunch, or the path of the deferred script.
    pub restart_cmd: Option<String>,
}

impl InstallResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            needs_restart: false,
            restart_cmd: None,
        }
    }
}

/// The recovery backup of `exe`: `<exe>.old`.
pub fn backup_path(exe: &Path) -> PathBuf {
    with_suffix(exe, BACKUP_SUFFIX)
}

/// Where a rollback parks the failing binary: `<exe>.failed`.
pub fn failed_path(exe: &Path) -> PathBuf {
    with_suffix(exe, FAILED_SUFFIX)
}

/// How the running executable gets replaced on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStrategy {
    InPlace,
    DeferredScript,
}

impl InstallStrategy {
    pub fn for_host() -> Self {
        if cfg!(windows) { Self::DeferredScript } else { Self::InPlace }
    }

    /// Whether rollback metadata can be written right after [`install`](Self::install).
    ///
    /// The deferred script only creates the backup after this process exits.
    pub fn backup_is_immediate(&self) -> bool {
        matches!(self, Self::InPlace)
    }

    /// Replace `current_exe` with `new_binary`.
    pub async fn install(&self, new_binary: &Path, current_exe: &Path) -> Result<InstallResult> {
        if !new_binary.is_file() {
            return Err(UpdateError::InstallFailed {
                reason: format!("prepared binary not found at {}", new_binary.display()),
            }
            .into());
        }

        match self {
            Self::InPlace => install_in_place(new_binary, current_exe).await,
            Self::DeferredScript => {
                let script = deferred_install_script(
                    std::process::id(),
                    new_binary,
                    current_exe,
                    &backup_path(current_exe),
                );
                let script_path = write_script(&script, "install").await?;
                if let Err(e) = launch_script(&script_path) {
                    discard_script(&script_path);
                    return Err(UpdateError::InstallFailed {
                        reason: format!("failed to launch install script: {e}"),
                    }
                    .into());
                }

                info!(script = %script_path.display(), "Scheduled deferred install");
                Ok(InstallResult {
                    success: true,
                    message: "Update will be installed when the application exits".to_string(),
                    needs_restart: true,
                    restart_cmd: Some(script_path.display().to_string()),
                })
            }
        }
    }

    /// Put the backup described by `info` back into the executable slot.
    pub async fn rollback(&self, info: &RollbackInfo) -> Result<RollbackResult> {
        match self {
            Self::InPlace => rollback_in_place(info).await,
            Self::DeferredScript => {
                let script = deferred_rollback_script(
                    std::process::id(),
                    &info.exe_path,
                    &info.backup_path,
                    &failed_path(&info.exe_path),
                );
                let script_path = write_script(&script, "rollback").await?;
                if let Err(e) = launch_script(&script_path) {
                    discard_script(&script_path);
                    return Err(UpdateError::RollbackFailed {
                        reason: format!("failed to launch rollback script: {e}"),
                    }
                    .into());
                }

                info!(script = %script_path.display(), version = %info.version, "Scheduled deferred rollback");
                Ok(RollbackResult {
                    success: true,
                    message: format!(
                        "Version {} will be restored when the application exits",
                        info.version
                    ),
                    restored_version: info.version.clone(),
                    needs_restart: true,
                })
            }
        }
    }
}

async fn install_in_place(new_binary: &Path, current_exe: &Path) -> Result<InstallResult> {
    let backup = backup_path(current_exe);

    let moved = if current_exe.exists() {
        if backup.exists() {
            debug!(path = %backup.display(), "Replacing stale backup");
            fs::remove_file(&backup).await.with_context(|| {
                format!("Failed to remove stale backup {}", backup.display())
            })?;
        }
        fs::rename(current_exe, &backup).await.map_err(|e| UpdateError::InstallFailed {
            reason: format!("could not move {} aside: {e}", current_exe.display()),
        })?;
        info!(backup = %backup.display(), "Moved current executable to backup");
        true
    } else {
        warn!(path = %current_exe.display(), "Current executable missing; installing without backup");
        false
    };

    if let Err(e) = copy_into_place(new_binary, current_exe).await {
        if moved {
            if let Err(restore) = fs::rename(&backup, current_exe).await {
                error!(
                    backup = %backup.display(),
                    error = %restore,
                    "Failed to restore original executable after failed install"
                );
            } else {
                info!("Restored original executable after failed install");
            }
        }
        return Err(UpdateError::InstallFailed {
            reason: format!("{e:#}"),
        }
        .into());
    }

    info!(path = %current_exe.display(), "Installed new executable");
    Ok(InstallResult {
        success: true,
        message: "Update installed; restart to run the new version".to_string(),
        needs_restart: true,
        restart_cmd: Some(current_exe.display().to_string()),
    })
}

async fn copy_into_place(new_binary: &Path, current_exe: &Path) -> Result<()> {
    fs::copy(new_binary, current_exe).await.with_context(|| {
        format!("Failed to copy {} to {}", new_binary.display(), current_exe.display())
    })?;
    set_executable(current_exe)
}

async fn rollback_in_place(info: &RollbackInfo) -> Result<RollbackResult> {
    let current = &info.exe_path;
    let backup = &info.backup_path;
    let failed = failed_path(current);

    if !backup.exists() {
        return Err(UpdateError::BackupMissing {
            path: backup.display().to_string(),
        }
        .into());
    }

    if failed.exists() {
        fs::remove_file(&failed)
            .await
            .with_context(|| format!("Failed to remove {}", failed.display()))?;
    }

    let parked = if current.exists() {
        fs::rename(current, &failed).await.map_err(|e| UpdateError::RollbackFailed {
            reason: format!("could not move {} aside: {e}", current.display()),
        })?;
        true
    } else {
        false
    };

    if let Err(e) = fs::rename(backup, current).await {
        if parked && let Err(restore) = fs::rename(&failed, current).await {
            return Err(UpdateError::RollbackFailed {
                reason: format!(
                    "restoring backup failed ({e}) and the failing binary could not be put back ({restore}); it remains at {}",
                    failed.display()
                ),
            }
            .into());
        }
        return Err(UpdateError::RollbackFailed {
            reason: format!("restoring backup failed: {e}"),
        }
        .into());
    }

    if let Err(e) = set_executable(current) {
        warn!(path = %current.display(), error = %e, "Failed to set execute permission after rollback");
    }

    info!(version = %info.version, path = %current.display(), "Rolled back executable");
    Ok(RollbackResult {
        success: true,
        message: format!("Rolled back to version {}", info.version),
        restored_version: info.version.clone(),
        needs_restart: true,
    })
}

fn batch_value(path: &Path) -> String {
    path.display().to_string().replace('%', "%%")
}

fn batch_script(pid: u32, vars: &[(&str, &Path)], body: &[&str]) -> String {
    let mut lines = vec![
        "@echo off".to_string(),
        "setlocal".to_string(),
        format!("set \"PID={pid}\""),
    ];
    for (name, path) in vars {
        lines.push(format!("set \"{name}={}\"", batch_value(path)));
    }
    lines.extend(
        [
            ":wait",
            "tasklist /FI \"PID eq %PID%\" 2>NUL | find \"%PID%\" >NUL",
            "if not errorlevel 1 (",
            "  timeout /t 1 /nobreak >NUL",
            "  goto wait",
            ")",
        ]
        .iter()
        .map(ToString::to_string),
    );
    lines.extend(body.iter().map(ToString::to_string));
    lines.push(":cleanup".to_string());
    lines.push("(goto) 2>NUL & del \"%~f0\"".to_string());
    lines.push(String::new());
    lines.join("\r\n")
}

/// Batch script that swaps in `new_binary` once process `pid` has exited.
pub fn deferred_install_script(pid: u32, new_binary: &Path, current: &Path, backup: &Path) -> String {
    batch_script(
        pid,
        &[("NEW", new_binary), ("CURRENT", current), ("BACKUP", backup)],
        &[
            "if exist \"%BACKUP%\" del /F /Q \"%BACKUP%\"",
            "if exist \"%CURRENT%\" move /Y \"%CURRENT%\" \"%BACKUP%\" >NUL",
            "copy /Y \"%NEW%\" \"%CURRENT%\" >NUL",
            "if errorlevel 1 (",
            "  if exist \"%BACKUP%\" move /Y \"%BACKUP%\" \"%CURRENT%\" >NUL",
            "  goto cleanup",
            ")",
            "start \"\" \"%CURRENT%\"",
        ],
    )
}

/// Batch script that restores `backup` once process `pid` has exited.
pub fn deferred_rollback_script(pid: u32, current: &Path, backup: &Path, failed: &Path) -> String {
    batch_script(
        pid,
        &[("CURRENT", current), ("BACKUP", backup), ("FAILED", failed)],
        &[
            "if not exist \"%BACKUP%\" goto cleanup",
            "if exist \"%FAILED%\" del /F /Q \"%FAILED%\"",
            "if exist \"%CURRENT%\" move /Y \"%CURRENT%\" \"%FAILED%\" >NUL",
            "move /Y \"%BACKUP%\" \"%CURRENT%\" >NUL",
            "if errorlevel 1 (",
            "  if exist \"%FAILED%\" move /Y \"%FAILED%\" \"%CURRENT%\" >NUL",
            "  goto cleanup",
            ")",
            "start \"\" \"%CURRENT%\"",
        ],
    )
}

async fn write_script(content: &str, kind: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir()
        .join(format!("gateway-{kind}-{}.bat", uuid::Uuid::new_v4()));
    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {kind} script {}", path.display()))?;
    Ok(path)
}

fn discard_script(script: &Path) {
    if let Err(e) = remove_file_if_exists(script) {
        warn!(path = %script.display(), error = %e, "Failed to remove unused script");
    }
}

fn launch_script(script: &Path) -> std::io::Result<()> {
    let mut command = std::process::Command::new("cmd");
    command
        .arg("/C")
        .arg(script)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    command.spawn().map(|_| ())
}
