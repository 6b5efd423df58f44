//! Update, rollback and health commands.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::Context;
use crate::update::{
    Channel, DownloadProgress, GitHubReleases, HealthMonitor, InstallStrategy, Poller,
    RollbackManager, SelfUpdater, UpdateChecker, UpdateInfo, global_poller,
};
use crate::utils::DownloadBar;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Release channel to check (stable or prerelease)
    #[arg(long)]
    pub channel: Option<Channel>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Release channel to install from (stable or prerelease)
    #[arg(long)]
    pub channel: Option<Channel>,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommand {
    /// Record a startup of the current version
    Record {
        /// Roll back immediately when a crash loop is detected
        #[arg(long)]
        auto_rollback: bool,
    },
    /// Clear the startup history of the current version
    MarkHealthy,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between checks (defaults to the configured interval)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Release channel to watch
    #[arg(long)]
    pub channel: Option<Channel>,

    /// Check right away instead of after the initial delay
    #[arg(long)]
    pub now: bool,
}

fn updater(ctx: &Context, channel: Option<Channel>) -> Result<SelfUpdater<GitHubReleases>> {
    let config = &ctx.config.update;
    let source = GitHubReleases::from_config(config)?;
    let mut updater =
        SelfUpdater::from_config(config, ctx.paths.clone(), source, ctx.cli.current_version())?;
    if let Some(exe) = &ctx.cli.exe {
        updater = updater.with_current_exe(exe.clone());
    }
    if let Some(channel) = channel {
        updater = updater.with_channel(channel);
    }
    Ok(updater)
}

fn rollback_manager(ctx: &Context) -> RollbackManager {
    RollbackManager::new(ctx.paths.clone(), InstallStrategy::for_host())
        .with_retention_days(ctx.config.update.rollback_retention_days)
}

fn health_monitor(ctx: &Context) -> HealthMonitor {
    HealthMonitor::new(
        ctx.paths.clone(),
        ctx.cli.current_version(),
        ctx.config.update.health_settings(),
        rollback_manager(ctx),
    )
}

pub async fn check(ctx: &Context, args: CheckArgs) -> Result<()> {
    let updater = updater(ctx, args.channel)?;
    let info = updater.check().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    print_check_result(ctx.cli.current_version(), &info);
    Ok(())
}

fn print_check_result(current: &str, info: &UpdateInfo) {
    if info.available {
        println!(
            "{}",
            format!("Update available: {current} -> {}", info.version).green()
        );
        if let Some(headline) = info.release_notes.lines().find(|l| !l.trim().is_empty()) {
            println!("  {}", headline.trim().dimmed());
        }
        println!("Run `gateway-update install` to install it");
    } else if info.version.is_empty() {
        println!("{}", "No releases have been published yet".yellow());
    } else {
        println!("{}", format!("You are on the latest version ({current})").green());
    }
}

pub async fn install(ctx: &Context, args: InstallArgs) -> Result<()> {
    let updater = updater(ctx, args.channel)?;
    let current = ctx.cli.current_version();

    println!("{}", "Checking for updates...".cyan());
    let info = updater.check().await?;
    if !info.available {
        println!("{}", format!("Already on the latest version ({current})").green());
        return Ok(());
    }

    println!("{}", format!("Installing {} (currently {current})...", info.version).cyan());
    let bar = DownloadBar::new("Downloading", !ctx.cli.no_progress);
    let on_progress = |p: DownloadProgress| bar.update(&p);
    let result = updater.install(&info, Some(&on_progress)).await;
    bar.finish_and_clear();

    let result = result?;
    if !result.success {
        bail!("Update was not installed: {}", result.message);
    }

    println!("{}", result.message.green());
    if result.needs_restart {
        println!("Restart the gateway to run version {}", info.version);
    }
    Ok(())
}

pub async fn rollback(ctx: &Context) -> Result<()> {
    println!("{}", "Rolling back to previous version...".yellow());

    let result = rollback_manager(ctx).rollback().await?;
    if !result.success {
        bail!("{}", result.message);
    }

    println!("{}", result.message.green());
    if result.needs_restart {
        println!("Restart the gateway to run version {}", result.restored_version);
    }
    Ok(())
}

pub async fn status(ctx: &Context) -> Result<()> {
    let config = &ctx.config.update;
    let manager = rollback_manager(ctx);

    println!("{:<10} {}", "Version:".bold(), ctx.cli.current_version());
    println!("{:<10} {}", "Channel:".bold(), config.channel);
    println!("{:<10} {}", "State:".bold(), ctx.paths.updates_dir().display());

    match manager.get_rollback_info().await? {
        Some(info) => println!(
            "{:<10} {} (backed up {})",
            "Rollback:".bold(),
            info.version.green(),
            info.backup_time.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("{:<10} {}", "Rollback:".bold(), "none".dimmed()),
    }

    match health_monitor(ctx).state().await? {
        Some(state) => {
            let healthy = state.last_healthy.map_or_else(
                || "never".to_string(),
                |t| t.format("%Y-%m-%d %H:%M UTC").to_string(),
            );
            println!(
                "{:<10} {} recent startup(s) of {}, last healthy {healthy}",
                "Health:".bold(),
                state.startups.len(),
                state.version
            );
        }
        None => println!("{:<10} {}", "Health:".bold(), "no startups recorded".dimmed()),
    }

    Ok(())
}

pub async fn health(ctx: &Context, command: HealthCommand) -> Result<()> {
    let monitor = health_monitor(ctx);

    match command {
        HealthCommand::Record { auto_rollback } => {
            let result = monitor.record_startup().await?;
            println!(
                "Startup recorded ({} within the restart window)",
                result.startup_count
            );

            if !result.should_rollback {
                return Ok(());
            }

            println!("{}", "Crash loop detected".red().bold());
            if auto_rollback {
                rollback(ctx).await
            } else {
                println!("Run `gateway-update rollback` to restore the previous version");
                Ok(())
            }
        }
        HealthCommand::MarkHealthy => {
            monitor.mark_healthy().await?;
            println!("{}", format!("Version {} marked healthy", ctx.cli.current_version()).green());
            Ok(())
        }
    }
}

pub async fn watch(ctx: &Context, args: WatchArgs) -> Result<()> {
    let config = &ctx.config.update;
    let interval = args.interval.map_or_else(|| config.check_interval(), Duration::from_secs);
    if interval.is_zero() {
        println!("{}", "Background checks are disabled (interval is 0)".yellow());
        return Ok(());
    }
    let initial_delay = if args.now {
        Duration::ZERO
    } else {
        config.initial_delay()
    };

    let source = GitHubReleases::from_config(config)?;
    let checker = UpdateChecker::new(source, ctx.cli.current_version());
    let poller = global_poller(|| Poller::new(checker, interval, initial_delay));
    poller.set_channel(args.channel.unwrap_or(config.channel));

    let current = ctx.cli.current_version().to_string();
    poller.start(Arc::new(move |info: UpdateInfo| {
        print_check_result(&current, &info);
    }));
    println!(
        "Watching for updates every {}s on the {} channel (Ctrl-C to stop)",
        interval.as_secs(),
        poller.channel()
    );

    tokio::signal::ctrl_c().await?;
    poller.stop();
    if let Some(error) = poller.last_error() {
        debug!(%error, "Last background check failed");
    }
    Ok(())
}
