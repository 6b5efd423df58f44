//! Self-update and rollback engine for the gateway desktop companion.
//!
//! The pipeline for one update is:
//!
//! 1. [`release`]: fetch the latest release from the feed and decide whether
//!    it differs from the running build.
//! 2. [`assets`]: pick the artifact (and its detached signature) for this
//!    OS and architecture.
//! 3. [`download`]: stream both into a private temporary directory.
//! 4. [`verification`]: size check, SHA-256, mandatory signature. Anything
//!    short of a valid signature from the embedded trust anchor is rejected.
//! 5. [`archive`]: extract zip / tar.gz archives with traversal protection,
//!    or pass a raw binary through.
//! 6. [`installer`]: swap the executable, leaving `<exe>.old` behind.
//!
//! After an install, [`rollback`] records how to restore the previous
//! binary, and [`health`] watches the new version's startups: a burst of
//! restarts inside a short window means the new version is crash-looping
//! and should be rolled back. [`poller`] runs checks in the background and
//! [`self_updater`] wires the whole pipeline together.
//!
//! Version comparison is plain inequality of normalized tags:
//! any published version that differs from the running one counts as an
//! update, including an older one.

pub mod archive;
pub mod assets;
pub mod config;
pub mod download;
pub mod health;
pub mod installer;
pub mod poller;
pub mod release;
pub mod rollback;
pub mod self_updater;
pub mod state;
pub mod verification;

pub use assets::{Platform, SelectedAssets, select_assets};
pub use config::UpdateConfig;
pub use download::{DownloadProgress, DownloadResult, Downloader};
pub use health::{HealthCheckResult, HealthMonitor, HealthSettings, HealthState};
pub use installer::{InstallResult, InstallStrategy};
pub use poller::{Poller, UpdateCallback};
pub use release::{
    Asset, Channel, GitHubReleases, ReleaseInfo, ReleaseSource, UpdateChecker, UpdateInfo,
};
pub use rollback::{RollbackInfo, RollbackManager, RollbackResult};
pub use self_updater::SelfUpdater;
pub use state::UpdatePaths;
pub use verification::{Verifier, VerifyResult};

use std::sync::OnceLock;

static GLOBAL_POLLER: OnceLock<Poller<GitHubReleases>> = OnceLock::new();

/// The process-wide poller. `init` builds it on first use and is ignored
/// afterwards.
///
/// Components that need their own schedule construct a [`Poller`] directly.
pub fn global_poller(
    init: impl FnOnce() -> Poller<GitHubReleases>,
) -> &'static Poller<GitHubReleases> {
    GLOBAL_POLLER.get_or_init(init)
}
