use anyhow::Result;
use assert_cmd::Command;
use gateway_update::test_utils::{ReleaseServer, fake_binary};
use gateway_update::update::installer::backup_path;
use gateway_update::update::{InstallStrategy, Platform, RollbackManager, UpdatePaths};
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

use super::{OWNER, REPO};

fn gateway_update(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gateway-update").unwrap();
    cmd.env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("GATEWAY_HOME")
        .arg("--home")
        .arg(home);
    cmd
}

fn write_config(home: &Path, server: &ReleaseServer) -> Result<()> {
    std::fs::create_dir_all(home)?;
    std::fs::write(
        home.join("config.toml"),
        format!(
            "[update]\napi_base = \"{}\"\nrepo_owner = \"{OWNER}\"\nrepo_name = \"{REPO}\"\n",
            server.base_url()
        ),
    )?;
    Ok(())
}

fn host_asset(version: &str) -> String {
    let platform = Platform::current();
    format!("gateway_{version}_{}_{}.tar.gz", platform.os, platform.arch)
}

#[test]
fn test_help_lists_commands() {
    let temp = TempDir::new().unwrap();
    gateway_update(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("health"));
}

#[test]
fn test_status_on_fresh_home() {
    let temp = TempDir::new().unwrap();
    gateway_update(temp.path())
        .args(["--current-version", "1.4.0", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.4.0"))
        .stdout(predicate::str::contains("stable"))
        .stdout(predicate::str::contains("no startups recorded"));
}

#[test]
fn test_rollback_without_backup_fails() {
    let temp = TempDir::new().unwrap();
    gateway_update(temp.path())
        .arg("rollback")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No rollback available"));
}

#[test]
fn test_invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("config.toml"), "[update]\ncheck_interval = \"soon\"\n")
        .unwrap();

    gateway_update(temp.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_reports_available_update() -> Result<()> {
    let server = ReleaseServer::start().await;
    let asset = host_asset("2.0.0");
    server.publish_release(OWNER, REPO, "v2.0.0", &[(asset.as_str(), fake_binary("gw", 64))]);
    let temp = TempDir::new()?;
    write_config(temp.path(), &server)?;

    gateway_update(temp.path())
        .args(["--current-version", "1.0.0", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Update available: 1.0.0 -> 2.0.0"));

    let output = gateway_update(temp.path())
        .args(["--current-version", "1.0.0", "check", "--json"])
        .output()?;
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(info["available"], true);
    assert_eq!(info["version"], "2.0.0");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_with_nothing_published() -> Result<()> {
    let server = ReleaseServer::start().await;
    let temp = TempDir::new()?;
    write_config(temp.path(), &server)?;

    gateway_update(temp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("No releases have been published yet"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_install_refuses_without_trusted_key() -> Result<()> {
    let server = ReleaseServer::start().await;
    let artifact = fake_binary("gateway 2.0.0", 1024 * 1024 + 16);
    let asset = host_asset("2.0.0");
    let sig = format!("{asset}.sig");
    server.publish_release(
        OWNER,
        REPO,
        "v2.0.0",
        &[(asset.as_str(), artifact), (sig.as_str(), vec![7u8; 64])],
    );

    let temp = TempDir::new()?;
    let home = temp.path().join("home");
    write_config(&home, &server)?;
    let exe = temp.path().join("gateway");
    std::fs::write(&exe, b"gateway 1.0.0")?;

    gateway_update(&home)
        .args(["--no-progress", "--current-version", "1.0.0", "--exe"])
        .arg(&exe)
        .arg("install")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));

    assert_eq!(std::fs::read(&exe)?, b"gateway 1.0.0");
    assert!(!backup_path(&exe).exists());
    Ok(())
}

#[cfg(not(windows))]
#[tokio::test(flavor = "multi_thread")]
async fn test_health_record_rolls_back_crash_loop() -> Result<()> {
    let temp = TempDir::new()?;
    let home = temp.path().join("home");
    let exe = temp.path().join("gateway");
    std::fs::write(&exe, b"gateway 2.0.0")?;
    std::fs::write(backup_path(&exe), b"gateway 1.0.0")?;
    RollbackManager::new(UpdatePaths::new(&home), InstallStrategy::InPlace)
        .save_rollback_info("1.0.0", &exe)
        .await?;

    for _ in 0..2 {
        gateway_update(&home)
            .args(["--current-version", "2.0.0", "health", "record", "--auto-rollback"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Crash loop detected").not());
    }

    gateway_update(&home)
        .args(["--current-version", "2.0.0", "health", "record", "--auto-rollback"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Crash loop detected"))
        .stdout(predicate::str::contains("1.0.0"));

    assert_eq!(std::fs::read(&exe)?, b"gateway 1.0.0");

    gateway_update(&home)
        .args(["--current-version", "1.0.0", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("none"));
    Ok(())
}
