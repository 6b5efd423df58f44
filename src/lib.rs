//! gateway-update - self-update and rollback for the local AI gateway
//!
//! The gateway ships as a single executable next to a tray companion. This
//! crate keeps that executable current and recovers from bad releases:
//!
//! - **Check**: query the GitHub release feed and compare the published tag
//!   with the running version.
//! - **Install**: download the artifact for this platform, verify its size,
//!   SHA-256 and mandatory Ed25519 signature, extract it safely, then swap the
//!   executable while keeping the previous one as `<exe>.old`.
//! - **Recover**: count rapid startups of a new version; a crash loop makes
//!   the previous executable eligible for rollback, which restores it.
//! - **Poll**: repeat the check in the background on a configurable schedule.
//!
//! # Modules
//!
//! - [`update`] - the update engine (feed, assets, download, verification,
//!   archive, installer, rollback, health, poller)
//! - [`config`] - `config.toml` in the gateway data directory
//! - [`core`] - error types and user-facing error rendering
//! - [`cli`] - the `gateway-update` command
//! - [`utils`] - file system and progress helpers
//! - [`constants`] - shared timeouts, thresholds and file names
//!
//! # State Layout
//!
//! ```text
//! <data dir>/
//! ├── config.toml
//! └── updates/
//!     ├── rollback.json   # version and location of the saved executable
//!     ├── health.json     # recent startups of the current version
//!     ├── pending.json    # Windows installs waiting for the next startup
//!     └── .locks/state.lock
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use gateway_update::config::{GlobalConfig, update_paths};
//! use gateway_update::update::{GitHubReleases, SelfUpdater};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GlobalConfig::load().await?.update;
//! let source = GitHubReleases::from_config(&config)?;
//! let updater = SelfUpdater::from_config(&config, update_paths()?, source, "1.4.0")?;
//!
//! let info = updater.check().await?;
//! if info.available {
//!     updater.install(&info, None).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod update;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
