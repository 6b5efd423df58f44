//! Streaming download of release assets into a private temporary directory.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::constants::{DOWNLOAD_TIMEOUT, USER_AGENT};
use crate::core::UpdateError;
use crate::update::assets::SelectedAssets;
use crate::update::release::Asset;
use crate::utils::fs::remove_dir_logged;

/// Progress of one download, reported after every received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub percent: f64,
}

impl DownloadProgress {
    fn new(total_bytes: u64, downloaded_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            0.0
        } else {
            (downloaded_bytes as f64 / total_bytes as f64 * 100.0).min(100.0)
        };
        Self {
            total_bytes,
            downloaded_bytes,
            percent,
        }
    }
}

/// Callback receiving [`DownloadProgress`] updates.
pub type ProgressCallback<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// A completed download.
///
/// The artifact and its signature live in a temporary directory owned by
/// this result; call [`DownloadResult::cleanup`] once the artifact has been
/// installed or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub version: String,
    pub signature_path: Option<PathBuf>,
}

impl DownloadResult {
    /// Directory holding the downloaded files.
    pub fn download_dir(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Remove the download directory. Failures are logged.
    pub fn cleanup(&self) {
        if let Some(dir) = self.download_dir() {
            remove_dir_logged(dir, "download directory");
        }
    }
}

/// Streams release assets to disk.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    temp_root: PathBuf,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            temp_root: std::env::temp_dir(),
        })
    }

    /// Create download directories under `root` instead of the system temp dir.
    #[must_use]
    pub fn with_temp_root(mut self, root: PathBuf) -> Self {
        self.temp_root = root;
        self
    }

    /// Download the selected binary and, when present, its signature.
    pub async fn download_release(
        &self,
        selected: &SelectedAssets<'_>,
        binary: &Asset,
        version: &str,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<DownloadResult> {
        let dir = self.create_download_dir().await?;

        let result = async {
            let path = self.download_into(&dir, binary, progress).await?;
            let signature_path = match selected.signature {
                Some(sig) => Some(self.download_into(&dir, sig, None).await?),
                None => None,
            };
            Ok(DownloadResult {
                path,
                version: version.to_string(),
                signature_path,
            })
        }
        .await;

        if result.is_err() {
            remove_dir_logged(&dir, "failed download");
        }
        result
    }

    /// Download a single asset into a fresh temporary directory.
    pub async fn download(
        &self,
        asset: &Asset,
        version: &str,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<DownloadResult> {
        let dir = self.create_download_dir().await?;
        match self.download_into(&dir, asset, progress).await {
            Ok(path) => Ok(DownloadResult {
                path,
                version: version.to_string(),
                signature_path: None,
            }),
            Err(e) => {
                remove_dir_logged(&dir, "failed download");
                Err(e)
            }
        }
    }

    async fn create_download_dir(&self) -> Result<PathBuf> {
        let dir = self.temp_root.join(format!("gateway-update-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create download directory {}", dir.display()))?;
        Ok(dir)
    }

    async fn download_into(
        &self,
        dir: &Path,
        asset: &Asset,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<PathBuf> {
        let file_name = Path::new(&asset.name)
            .file_name()
            .with_context(|| format!("Invalid asset name '{}'", asset.name))?;
        let dest = dir.join(file_name);

        info!(url = %asset.download_url, dest = %dest.display(), "Downloading asset");
        let mut response = self
            .client
            .get(&asset.download_url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", asset.download_url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Http {
                url: asset.download_url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let total = response.content_length().filter(|len| *len > 0).unwrap_or(asset.size);

        let mut file = tokio::fs::File::create(&dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Download of {} was interrupted", asset.name))?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            downloaded += chunk.len() as u64;

            if total > 0
                && let Some(callback) = progress
            {
                callback(DownloadProgress::new(total, downloaded));
            }
        }

        file.flush().await.context("Failed to flush download")?;
        file.sync_all().await.context("Failed to sync download")?;

        debug!(bytes = downloaded, "Download complete");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let p = DownloadProgress::new(200, 50);
        assert_eq!(p.percent, 25.0);
        assert_eq!(DownloadProgress::new(0, 10).percent, 0.0);
        assert_eq!(DownloadProgress::new(10, 20).percent, 100.0);
    }

    #[test]
    fn test_cleanup_removes_download_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("gateway-update-x");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("artifact"), b"data").unwrap();

        let result = DownloadResult {
            path: dir.join("artifact"),
            version: "1.0.0".to_string(),
            signature_path: None,
        };
        result.cleanup();
        assert!(!dir.exists());
    }
}
