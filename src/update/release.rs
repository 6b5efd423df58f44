//! Release discovery: the release feed client and the update check built on it.
//!
//! The feed is the GitHub releases API. A stable check asks for
//! `/releases/latest`; a prerelease check lists `/releases` and takes the
//! newest non-draft entry. "Nothing published yet" (HTTP 404 or an empty list)
//! is a normal answer, not an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::constants::{DEV_VERSION, METADATA_TIMEOUT, USER_AGENT};
use crate::core::UpdateError;
use crate::update::assets::{Platform, select_assets};
use crate::update::config::UpdateConfig;

/// Which releases a check considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Only full releases.
    #[default]
    Stable,
    /// Full releases and prereleases.
    Prerelease,
}

impl FromStr for Channel {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "prerelease" | "beta" => Ok(Self::Prerelease),
            other => Err(UpdateError::ConfigError {
                message: format!("unknown release channel '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Prerelease => f.write_str("prerelease"),
        }
    }
}

/// One downloadable file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// A published release as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Normalized version (tag without its `v` prefix).
    pub version: String,
    /// Raw tag as published.
    pub tag: String,
    pub release_notes: String,
    pub prerelease: bool,
    pub assets: Vec<Asset>,
}

/// Result of an update check, as consumed by the tray UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateInfo {
    pub available: bool,
    pub version: String,
    pub download_url: String,
    pub release_notes: String,
    pub assets: Vec<Asset>,
}

impl UpdateInfo {
    /// The answer when nothing is published.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Raw release object of the GitHub API.
#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<Asset>,
}

impl From<GitHubRelease> for ReleaseInfo {
    fn from(release: GitHubRelease) -> Self {
        Self {
            version: normalize_version(&release.tag_name),
            tag: release.tag_name,
            release_notes: release.body.unwrap_or_default(),
            prerelease: release.prerelease,
            assets: release.assets,
        }
    }
}

/// A source of published releases.
///
/// `Ok(None)` means the source answered and has nothing published.
pub trait ReleaseSource: Send + Sync {
    fn fetch_latest(
        &self,
        channel: Channel,
    ) -> impl Future<Output = Result<Option<ReleaseInfo>>> + Send;
}

/// Release feed backed by the GitHub releases API.
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubReleases {
    pub fn new(api_base: &str, owner: &str, repo: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(METADATA_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub fn from_config(config: &UpdateConfig) -> Result<Self> {
        Self::new(&config.api_base, &config.repo_owner, &config.repo_name)
    }

    /// URL queried for `channel`.
    pub fn endpoint(&self, channel: Channel) -> String {
        match channel {
            Channel::Stable => {
                format!("{}/repos/{}/{}/releases/latest", self.api_base, self.owner, self.repo)
            }
            Channel::Prerelease => {
                format!("{}/repos/{}/{}/releases?per_page=10", self.api_base, self.owner, self.repo)
            }
        }
    }
}

impl ReleaseSource for GitHubReleases {
    async fn fetch_latest(&self, channel: Channel) -> Result<Option<ReleaseInfo>> {
        let url = self.endpoint(channel);
        debug!(%url, %channel, "Fetching release feed");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to reach release feed at {url}"))?;

        let status = response.status();
        let body = response.text().await.context("Failed to read release feed response")?;
        parse_feed_response(&url, status.as_u16(), &body, channel)
    }
}

/// Interpret one release feed response.
fn parse_feed_response(
    url: &str,
    status: u16,
    body: &str,
    channel: Channel,
) -> Result<Option<ReleaseInfo>> {
    if status == 404 {
        debug!(%url, "Release feed reports no published releases");
        return Ok(None);
    }
    if !(200..300).contains(&status) {
        return Err(UpdateError::Http {
            url: url.to_string(),
            status,
        }
        .into());
    }

    let parse_error = |e: serde_json::Error| UpdateError::FeedParse {
        reason: e.to_string(),
    };

    let release = match channel {
        Channel::Stable => Some(serde_json::from_str::<GitHubRelease>(body).map_err(parse_error)?),
        Channel::Prerelease => serde_json::from_str::<Vec<GitHubRelease>>(body)
            .map_err(parse_error)?
            .into_iter()
            .find(|r| !r.draft),
    };

    Ok(release.filter(|r| !r.draft).map(ReleaseInfo::from))
}

/// Strip whitespace and a leading `v` from a tag.
#[must_use]
pub fn normalize_version(tag: &str) -> String {
    let trimmed = tag.trim();
    trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed).to_string()
}

/// Whether `version` is the placeholder reported by development builds.
#[must_use]
pub fn is_dev_version(version: &str) -> bool {
    let normalized = normalize_version(version);
    normalized.is_empty() || normalized == DEV_VERSION || normalized == "0.0.0-dev"
}

/// An update is available when the normalized versions differ and the
/// running build is a real release.
///
/// This is plain inequality, not semver ordering: a remote release older
/// than the running build is still reported. Such downgrades are logged.
#[must_use]
pub fn is_update_available(remote: &str, current: &str) -> bool {
    let remote = normalize_version(remote);
    let current = normalize_version(current);

    if remote.is_empty() || is_dev_version(&current) || remote == current {
        return false;
    }

    if let (Ok(r), Ok(c)) = (semver::Version::parse(&remote), semver::Version::parse(&current))
        && r < c
    {
        warn!(%remote, %current, "Published release is older than the running build");
    }
    true
}

/// Performs update checks against a [`ReleaseSource`] for this build and platform.
pub struct UpdateChecker<S> {
    source: S,
    current_version: String,
    platform: Platform,
}

impl<S: ReleaseSource> UpdateChecker<S> {
    pub fn new(source: S, current_version: impl Into<String>) -> Self {
        Self {
            source,
            current_version: current_version.into(),
            platform: Platform::current(),
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Check the stable channel.
    pub async fn check_for_updates(&self) -> Result<UpdateInfo> {
        self.check_for_updates_on(Channel::Stable).await
    }

    /// Fetch the latest release on `channel` and compare it to the running build.
    pub async fn check_for_updates_on(&self, channel: Channel) -> Result<UpdateInfo> {
        let Some(release) = self.source.fetch_latest(channel).await? else {
            info!("No releases published");
            return Ok(UpdateInfo::unavailable());
        };

        let available = is_update_available(&release.version, &self.current_version);
        let download_url = select_assets(&release.assets, &self.platform)
            .binary
            .map(|a| a.download_url.clone())
            .unwrap_or_default();

        if available {
            info!(current = %self.current_version, latest = %release.version, "Update available");
        } else {
            debug!(version = %release.version, "No update available");
        }

        Ok(UpdateInfo {
            available,
            version: release.version,
            download_url,
            release_notes: release.release_notes,
            assets: release.assets,
        })
    }
}
