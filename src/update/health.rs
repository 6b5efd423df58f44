//! Crash-loop detection for the installed version.
//!
//! Every process start is recorded in `updates/health.json`. Starts older
//! than the rapid-restart window are forgotten, so only a burst of restarts
//! counts. Once the burst reaches the threshold and a backup exists, the
//! caller is told to roll back. A process that survives the grace period
//! marks itself healthy, which clears the history.
//!
//! History is kept per version: when the running build reports a different
//! version than the persisted state, counting starts over.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{CRASH_LOOP_THRESHOLD, HEALTHY_GRACE_PERIOD_SECS, RAPID_RESTART_WINDOW_SECS};
use crate::update::rollback::RollbackManager;
use crate::update::state::{UpdatePaths, load_json, save_json};

/// Thresholds for crash-loop detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    pub crash_loop_threshold: usize,
    pub rapid_restart_window: chrono::Duration,
    pub grace_period: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            crash_loop_threshold: CRASH_LOOP_THRESHOLD,
            rapid_restart_window: chrono::Duration::seconds(RAPID_RESTART_WINDOW_SECS as i64),
            grace_period: Duration::from_secs(HEALTHY_GRACE_PERIOD_SECS),
        }
    }
}

/// Persisted startup history (`updates/health.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub version: String,
    #[serde(default)]
    pub startups: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub last_healthy: Option<DateTime<Utc>>,
}

impl HealthState {
    fn fresh(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::default()
        }
    }
}

/// Result of recording one startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    /// Startups retained inside the rapid-restart window, this one included.
    pub startup_count: usize,
    pub last_startup: DateTime<Utc>,
    pub should_rollback: bool,
}

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    paths: UpdatePaths,
    current_version: String,
    settings: HealthSettings,
    rollback: RollbackManager,
}

impl HealthMonitor {
    pub fn new(
        paths: UpdatePaths,
        current_version: impl Into<String>,
        settings: HealthSettings,
        rollback: RollbackManager,
    ) -> Self {
        Self {
            paths,
            current_version: current_version.into(),
            settings,
            rollback,
        }
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Record a process start now.
    pub async fn record_startup(&self) -> Result<HealthCheckResult> {
        self.record_startup_at(Utc::now()).await
    }

    /// Record a process start at `now`.
    ///
    /// Also promotes a finished deferred install to rollback metadata, so the
    /// first start of a freshly installed version can already roll back.
    pub async fn record_startup_at(&self, now: DateTime<Utc>) -> Result<HealthCheckResult> {
        if let Err(e) = self.rollback.finalize_pending().await {
            warn!(error = %e, "Failed to finalize pending install");
        }

        let startup_count = {
            let _lock = self.paths.lock().await?;
            let health_file = self.paths.health_file();

            let mut state = match load_json::<HealthState>(&health_file).await? {
                Some(state) if state.version == self.current_version => state,
                Some(state) => {
                    info!(
                        previous = %state.version,
                        current = %self.current_version,
                        "Version changed; resetting startup history"
                    );
                    HealthState::fresh(&self.current_version)
                }
                None => HealthState::fresh(&self.current_version),
            };

            let window = self.settings.rapid_restart_window;
            state.startups.retain(|t| *t <= now && now - *t <= window);
            state.startups.push(now);

            save_json(&health_file, &state).await?;
            state.startups.len()
        };

        let should_rollback = startup_count >= self.settings.crash_loop_threshold
            && self.rollback.can_rollback().await;

        if should_rollback {
            warn!(
                version = %self.current_version,
                startups = startup_count,
                "Crash loop detected"
            );
        } else {
            debug!(startups = startup_count, "Recorded startup");
        }

        Ok(HealthCheckResult {
            healthy: !should_rollback,
            startup_count,
            last_startup: now,
            should_rollback,
        })
    }

    /// Clear the startup history after the process has run long enough.
    pub async fn mark_healthy(&self) -> Result<()> {
        let _lock = self.paths.lock().await?;
        let mut state = HealthState::fresh(&self.current_version);
        state.last_healthy = Some(Utc::now());
        save_json(&self.paths.health_file(), &state).await?;
        info!(version = %self.current_version, "Marked healthy");
        Ok(())
    }

    /// Mark healthy once the grace period has elapsed.
    pub fn spawn_grace_timer(&self) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(monitor.settings.grace_period).await;
            if let Err(e) = monitor.mark_healthy().await {
                warn!(error = %e, "Failed to mark healthy");
            }
        })
    }

    /// The persisted health state, if any.
    pub async fn state(&self) -> Result<Option<HealthState>> {
        let _lock = self.paths.lock().await?;
        load_json(&self.paths.health_file()).await
    }
}
