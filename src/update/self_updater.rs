//! End-to-end update: check, download, verify, prepare, install.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::update::archive::prepare_artifact;
use crate::update::assets::select_assets;
use crate::update::config::UpdateConfig;
use crate::update::download::{DownloadResult, Downloader, ProgressCallback};
use crate::update::installer::{InstallResult, InstallStrategy, backup_path};
use crate::update::release::{Channel, ReleaseSource, UpdateChecker, UpdateInfo};
use crate::update::rollback::RollbackManager;
use crate::update::state::UpdatePaths;
use crate::update::verification::Verifier;

/// Ties the update pipeline together for one installed executable.
///
/// # Examples
///
/// ```rust,no_run
/// use gateway_update::update::{GitHubReleases, SelfUpdater, UpdateConfig, UpdatePaths};
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = UpdateConfig::default();
/// let source = GitHubReleases::from_config(&config)?;
/// let paths = UpdatePaths::new(Path::new("/home/me/.gateway"));
/// let updater = SelfUpdater::from_config(&config, paths, source, env!("CARGO_PKG_VERSION"))?;
///
/// let info = updater.check().await?;
/// if info.available {
///     let result = updater.install(&info, None).await?;
///     println!("{}", result.message);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SelfUpdater<S> {
    checker: UpdateChecker<S>,
    downloader: Downloader,
    verifier: Verifier,
    rollback: RollbackManager,
    channel: Channel,
    binary_names: Vec<String>,
    current_exe: PathBuf,
}

impl<S: ReleaseSource> SelfUpdater<S> {
    pub fn new(
        checker: UpdateChecker<S>,
        downloader: Downloader,
        verifier: Verifier,
        rollback: RollbackManager,
        current_exe: PathBuf,
    ) -> Self {
        Self {
            checker,
            downloader,
            verifier,
            rollback,
            channel: Channel::default(),
            binary_names: UpdateConfig::default().binary_names,
            current_exe,
        }
    }

    /// Updater for the running executable, configured from `config`.
    pub fn from_config(
        config: &UpdateConfig,
        paths: UpdatePaths,
        source: S,
        current_version: &str,
    ) -> Result<Self> {
        let current_exe =
            std::env::current_exe().context("Failed to locate the running executable")?;
        let rollback = RollbackManager::new(paths, InstallStrategy::for_host())
            .with_retention_days(config.rollback_retention_days);
        let verifier = Verifier::default().with_min_size(config.min_artifact_size);

        Ok(Self::new(
            UpdateChecker::new(source, current_version),
            Downloader::new()?,
            verifier,
            rollback,
            current_exe,
        )
        .with_channel(config.channel)
        .with_binary_names(config.binary_names.clone()))
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn with_binary_names(mut self, names: Vec<String>) -> Self {
        self.binary_names = names;
        self
    }

    /// Manage `exe` instead of the running executable.
    #[must_use]
    pub fn with_current_exe(mut self, exe: PathBuf) -> Self {
        self.current_exe = exe;
        self
    }

    pub fn checker(&self) -> &UpdateChecker<S> {
        &self.checker
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn current_exe(&self) -> &Path {
        &self.current_exe
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub async fn check(&self) -> Result<UpdateInfo> {
        self.checker.check_for_updates_on(self.channel).await
    }

    /// Download, verify and install the release described by `info`.
    ///
    /// A release that fails verification yields `success: false` with the
    /// verifier's message; nothing on disk is touched in that case.
    pub async fn install(
        &self,
        info: &UpdateInfo,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<InstallResult> {
        if !info.available {
            return Ok(InstallResult::failed("No update available"));
        }
        warn_on_downgrade(self.checker.current_version(), &info.version);

        let platform = self.checker.platform();
        let selected = select_assets(&info.assets, platform);
        let binary = selected.require_binary(platform)?;
        info!(asset = %binary.name, version = %info.version, "Installing update");

        let download =
            self.downloader.download_release(&selected, binary, &info.version, progress).await?;

        let result = self.install_download(&download).await;

        let keep_for_script = matches!(&result, Ok(r) if r.success)
            && !self.rollback.strategy().backup_is_immediate();
        if keep_for_script {
            debug!("Keeping download directory for the deferred install script");
        } else {
            download.cleanup();
        }
        result
    }

    /// Verify, prepare and install an already downloaded artifact.
    pub async fn install_download(&self, download: &DownloadResult) -> Result<InstallResult> {
        let verification = self.verifier.verify_download(download).await;
        if !verification.valid {
            warn!(reason = %verification.message, "Refusing to install unverified download");
            return Ok(InstallResult::failed(verification.message));
        }

        let prepared = prepare_artifact(&download.path, &self.binary_names).await?;
        let strategy = self.rollback.strategy();
        let previous_version = self.checker.current_version();

        let result = strategy.install(&prepared, &self.current_exe).await?;

        if strategy.backup_is_immediate() {
            if backup_path(&self.current_exe).exists() {
                if let Err(e) =
                    self.rollback.save_rollback_info(previous_version, &self.current_exe).await
                {
                    error!(error = %e, "Installed update but could not record rollback info");
                }
            } else {
                warn!("No previous executable was backed up; rollback will not be available");
            }
        } else if let Err(e) = self
            .rollback
            .record_pending_install(previous_version, &self.current_exe, download.download_dir())
            .await
        {
            error!(error = %e, "Scheduled update but could not record pending install");
        }

        Ok(result)
    }
}

fn warn_on_downgrade(current: &str, target: &str) {
    let parse = |v: &str| semver::Version::parse(&crate::update::release::normalize_version(v));
    if let (Ok(current), Ok(target)) = (parse(current), parse(target))
        && target < current
    {
        warn!(%current, %target, "Installing an older version than the one running");
    }
}
