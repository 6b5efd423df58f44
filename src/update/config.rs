use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    CRASH_LOOP_THRESHOLD, DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_INITIAL_DELAY_SECS,
    HEALTHY_GRACE_PERIOD_SECS, MIN_ARTIFACT_SIZE, RAPID_RESTART_WINDOW_SECS,
    ROLLBACK_RETENTION_DAYS,
};
use crate::core::UpdateError;
use crate::update::release::Channel;

/// Configuration settings for the gateway self-update behavior.
///
/// Stored under the `[update]` table of the global configuration file.
/// Every field has a default, so an empty table (or no table at all) yields
/// the shipped behavior.
///
/// # TOML Example
/// ```toml
/// [update]
/// channel = "stable"
/// check_interval = 21600
/// crash_loop_threshold = 3
/// rapid_restart_window = 30
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Owner of the repository that publishes releases.
    #[serde(default = "default_repo_owner")]
    pub repo_owner: String,

    /// Name of the repository that publishes releases.
    #[serde(default = "default_repo_name")]
    pub repo_name: String,

    /// Base URL of the release API. Overridable for mirrors.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Release channel followed by checks.
    #[serde(default)]
    pub channel: Channel,

    /// Seconds between background checks. `0` disables polling.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Seconds to wait before the first background check.
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,

    /// Number of startups within the window that triggers a rollback.
    #[serde(default = "default_crash_loop_threshold")]
    pub crash_loop_threshold: usize,

    /// Width of the rapid-restart window in seconds.
    #[serde(default = "default_rapid_restart_window")]
    pub rapid_restart_window: u64,

    /// Seconds the process has to stay up before it is marked healthy.
    #[serde(default = "default_healthy_grace_period")]
    pub healthy_grace_period: u64,

    /// Days a backup is kept before it expires.
    #[serde(default = "default_rollback_retention_days")]
    pub rollback_retention_days: i64,

    /// Smallest artifact size accepted by the verifier.
    #[serde(default = "default_min_artifact_size")]
    pub min_artifact_size: u64,

    /// Executable names searched for inside release archives.
    #[serde(default = "default_binary_names")]
    pub binary_names: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            repo_owner: default_repo_owner(),
            repo_name: default_repo_name(),
            api_base: default_api_base(),
            channel: Channel::default(),
            check_interval: default_check_interval(),
            initial_delay: default_initial_delay(),
            crash_loop_threshold: default_crash_loop_threshold(),
            rapid_restart_window: default_rapid_restart_window(),
            healthy_grace_period: default_healthy_grace_period(),
            rollback_retention_days: default_rollback_retention_days(),
            min_artifact_size: default_min_artifact_size(),
            binary_names: default_binary_names(),
        }
    }
}

fn default_repo_owner() -> String {
    "gateway-dev".to_string()
}

fn default_repo_name() -> String {
    "gateway".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_initial_delay() -> u64 {
    DEFAULT_INITIAL_DELAY_SECS
}

fn default_crash_loop_threshold() -> usize {
    CRASH_LOOP_THRESHOLD
}

fn default_rapid_restart_window() -> u64 {
    RAPID_RESTART_WINDOW_SECS
}

fn default_healthy_grace_period() -> u64 {
    HEALTHY_GRACE_PERIOD_SECS
}

fn default_rollback_retention_days() -> i64 {
    ROLLBACK_RETENTION_DAYS
}

fn default_min_artifact_size() -> u64 {
    MIN_ARTIFACT_SIZE
}

fn default_binary_names() -> Vec<String> {
    vec!["gateway".to_string(), "gateway-desktop".to_string()]
}

impl UpdateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the config equals the shipped defaults (used to keep saved files small).
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Reject values that would disable recovery or break time arithmetic.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.crash_loop_threshold == 0 {
            return Err(UpdateError::ConfigError {
                message: "update.crash_loop_threshold must be at least 1".to_string(),
            });
        }
        if self.rollback_retention_days <= 0
            || chrono::Duration::try_days(self.rollback_retention_days).is_none()
        {
            return Err(UpdateError::ConfigError {
                message: format!(
                    "update.rollback_retention_days must be a positive number of days, got {}",
                    self.rollback_retention_days
                ),
            });
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay)
    }

    pub fn healthy_grace_period(&self) -> Duration {
        Duration::from_secs(self.healthy_grace_period)
    }

    /// Crash-loop settings for the health monitor.
    pub fn health_settings(&self) -> crate::update::health::HealthSettings {
        crate::update::health::HealthSettings {
            crash_loop_threshold: self.crash_loop_threshold,
            rapid_restart_window: i64::try_from(self.rapid_restart_window)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
            grace_period: self.healthy_grace_period(),
        }
    }
}
