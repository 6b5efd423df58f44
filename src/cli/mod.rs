//! Command-line interface for the gateway updater.
//!
//! The tray application embeds the library directly; this binary exposes
//! the same operations for scripting, support sessions and testing.
//!
//! # Commands
//!
//! - `check` - Ask the release feed whether a different version is published
//! - `install` - Download, verify and install the published release
//! - `rollback` - Restore the executable saved by the last install
//! - `status` - Show the running version, rollback availability and health
//! - `health record` / `health mark-healthy` - Drive the crash-loop detector
//! - `watch` - Poll for updates in the foreground until interrupted
//!
//! # Global Options
//!
//! - `--verbose` / `--quiet` - Log level (`RUST_LOG` takes precedence)
//! - `--no-progress` - Disable progress bars
//! - `--home` - Gateway data directory (defaults to `GATEWAY_HOME` or the
//!   platform location)
//! - `--exe` - Executable to manage instead of this binary
//! - `--current-version` - Version of that executable
//!
//! # Example
//!
//! ```bash
//! gateway-update check
//! gateway-update install --exe /opt/gateway/bin/gateway --current-version 1.4.0
//! gateway-update health record --auto-rollback
//! ```

mod update;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::{GlobalConfig, home_dir};
use crate::update::UpdatePaths;

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter used when `RUST_LOG` is unset; `None` disables logging.
    pub log_level: Option<String>,
    pub no_progress: bool,
    pub home: Option<PathBuf>,
    pub exe: Option<PathBuf>,
    pub current_version: Option<String>,
}

impl CliConfig {
    /// Install the tracing subscriber. Log output goes to stderr so command
    /// output on stdout stays machine-readable.
    pub fn init_logging(&self) {
        let filter = match (std::env::var("RUST_LOG"), &self.log_level) {
            (Ok(_), _) => EnvFilter::from_default_env(),
            (Err(_), Some(level)) => EnvFilter::new(format!("gateway_update={level}")),
            (Err(_), None) => return,
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// The data directory for this invocation.
    pub fn home(&self) -> Result<PathBuf> {
        match &self.home {
            Some(home) => Ok(home.clone()),
            None => home_dir(),
        }
    }

    /// Version of the managed executable.
    pub fn current_version(&self) -> &str {
        self.current_version.as_deref().unwrap_or(env!("CARGO_PKG_VERSION"))
    }
}

/// Command context shared by every subcommand.
pub(crate) struct Context {
    pub cli: CliConfig,
    pub config: GlobalConfig,
    pub paths: UpdatePaths,
}

impl Context {
    async fn load(cli: CliConfig) -> Result<Self> {
        let home = cli.home()?;
        let config = GlobalConfig::load_in(&home).await?;
        Ok(Self {
            paths: UpdatePaths::new(&home),
            config,
            cli,
        })
    }
}

#[derive(Parser)]
#[command(
    name = "gateway-update",
    about = "Self-update and rollback for the local AI gateway",
    version,
    author
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    /// Gateway data directory
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Executable to manage (defaults to this binary)
    #[arg(long, global = true, value_name = "PATH")]
    exe: Option<PathBuf>,

    /// Version of the managed executable
    #[arg(long, global = true, value_name = "VERSION")]
    current_version: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the release feed for a different version
    Check(update::CheckArgs),

    /// Download, verify and install the published release
    Install(update::InstallArgs),

    /// Restore the executable saved by the last install
    Rollback,

    /// Show version, rollback and health information
    Status,

    /// Record startups and health for crash-loop detection
    Health {
        #[command(subcommand)]
        command: update::HealthCommand,
    },

    /// Poll for updates until interrupted
    Watch(update::WatchArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        config.init_logging();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            home: self.home.clone(),
            exe: self.exe.clone(),
            current_version: self.current_version.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        let ctx = Context::load(config).await?;

        match self.command {
            Commands::Check(args) => update::check(&ctx, args).await,
            Commands::Install(args) => update::install(&ctx, args).await,
            Commands::Rollback => update::rollback(&ctx).await,
            Commands::Status => update::status(&ctx).await,
            Commands::Health { command } => update::health(&ctx, command).await,
            Commands::Watch(args) => update::watch(&ctx, args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_config_levels() {
        let cli = Cli::parse_from(["gateway-update", "--verbose", "status"]);
        assert_eq!(cli.build_config().log_level.as_deref(), Some("debug"));

        let cli = Cli::parse_from(["gateway-update", "status", "--quiet"]);
        assert_eq!(cli.build_config().log_level, None);

        let cli = Cli::parse_from(["gateway-update", "check"]);
        assert_eq!(cli.build_config().log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["gateway-update", "-v", "-q", "status"]).is_err());
    }

    #[test]
    fn test_global_paths() {
        let cli = Cli::parse_from([
            "gateway-update",
            "install",
            "--home",
            "/tmp/gw",
            "--exe",
            "/opt/gateway/gateway",
            "--current-version",
            "1.2.3",
        ]);
        let config = cli.build_config();
        assert_eq!(config.home().unwrap(), PathBuf::from("/tmp/gw"));
        assert_eq!(config.exe, Some(PathBuf::from("/opt/gateway/gateway")));
        assert_eq!(config.current_version(), "1.2.3");
        assert!(!config.no_progress);
    }

    #[test]
    fn test_current_version_defaults_to_package() {
        assert_eq!(CliConfig::default().current_version(), env!("CARGO_PKG_VERSION"));
    }
}
