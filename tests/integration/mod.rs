//! Integration test suite for gateway-update
//!
//! End-to-end tests that drive the public API and the `gateway-update`
//! binary against a local release server.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **feed**: Release feed parsing, channels and asset downloads
//! - **recovery**: Install, crash-loop detection and rollback on disk
//! - **poller**: Background checks against a live feed
//! - **cli**: The command-line interface

mod cli;
mod feed;
mod poller;
mod recovery;

use gateway_update::test_utils::ReleaseServer;

pub const OWNER: &str = "gateway-dev";
pub const REPO: &str = "gateway";

pub fn latest_path() -> String {
    format!("/repos/{OWNER}/{REPO}/releases/latest")
}

pub fn list_path() -> String {
    format!("/repos/{OWNER}/{REPO}/releases?per_page=10")
}

/// JSON for one release entry served by `server`.
pub fn release_json(
    server: &ReleaseServer,
    tag: &str,
    prerelease: bool,
    draft: bool,
) -> serde_json::Value {
    serde_json::json!({
        "tag_name": tag,
        "body": format!("Notes for {tag}"),
        "draft": draft,
        "prerelease": prerelease,
        "assets": [{
            "name": format!("gateway_{tag}_linux_amd64.tar.gz"),
            "browser_download_url": server.url(&format!("/assets/{tag}.tar.gz")),
            "size": 1234,
        }],
    })
}
