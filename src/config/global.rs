//! Global configuration for the gateway updater.
//!
//! The configuration file lives in the gateway data directory:
//!
//! - **Windows / macOS**: `<local data dir>/gateway/config.toml`
//! - **Linux and others**: `~/.gateway/config.toml`
//!
//! The whole data directory can be moved with the `GATEWAY_HOME` environment
//! variable; update state then lives in `$GATEWAY_HOME/updates/`.
//!
//! # File Format
//!
//! ```toml
//! [update]
//! channel = "prerelease"
//! check_interval = 3600
//! crash_loop_threshold = 3
//! ```
//!
//! A missing file, or a file without an `[update]` table, yields the default
//! settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::core::UpdateError;
use crate::update::config::UpdateConfig;
use crate::update::state::UpdatePaths;

/// Environment variable overriding the gateway data directory.
pub const HOME_ENV: &str = "GATEWAY_HOME";

/// Contents of `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Self-update settings.
    #[serde(default, skip_serializing_if = "UpdateConfig::is_default")]
    pub update: UpdateConfig,
}

impl GlobalConfig {
    /// Load from the default location, falling back to defaults if the file is absent.
    pub async fn load() -> Result<Self> {
        Self::load_in(&home_dir()?).await
    }

    /// Load `config.toml` from the data directory `home`.
    pub async fn load_in(home: &Path) -> Result<Self> {
        let path = home.join("config.toml");
        if path.exists() {
            Self::load_from(&path).await
        } else {
            debug!(path = %path.display(), "No config file; using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid TOML for this schema, or
    /// holds values rejected by [`UpdateConfig::validate`].
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content).map_err(|e| UpdateError::ConfigError {
            message: format!("{}: {e}", path.display()),
        })?;
        config.update.validate()?;
        Ok(config)
    }

    /// Save to the default location.
    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?).await
    }

    /// Save to a specific file, creating parent directories as needed.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }

        Ok(())
    }

    /// Path of `config.toml` inside the data directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(home_dir()?.join("config.toml"))
    }
}

/// The gateway data directory, honouring `GATEWAY_HOME`.
pub fn home_dir() -> Result<PathBuf> {
    resolve_home(std::env::var_os(HOME_ENV).map(PathBuf::from))
}

/// Update state locations inside the data directory.
pub fn update_paths() -> Result<UpdatePaths> {
    Ok(UpdatePaths::new(&home_dir()?))
}

fn resolve_home(override_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir);
    }

    if cfg!(any(target_os = "windows", target_os = "macos")) {
        Ok(dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
            .join("gateway"))
    } else {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(".gateway"))
    }
}
