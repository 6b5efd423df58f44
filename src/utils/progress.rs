//! Terminal progress reporting for downloads.
//!
//! Thin wrapper around `indicatif`. Bars are hidden when the caller asks for
//! it (`--no-progress`) or when `GATEWAY_NO_PROGRESS` is set.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};

use crate::update::download::DownloadProgress;

fn is_progress_disabled() -> bool {
    std::env::var("GATEWAY_NO_PROGRESS").is_ok()
}

/// A progress bar that tracks a download in bytes.
#[derive(Clone)]
pub struct DownloadBar {
    inner: IndicatifBar,
}

impl DownloadBar {
    pub fn new(prefix: impl Into<String>, visible: bool) -> Self {
        let bar = if !visible || is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(0);
            bar.set_style(download_style());
            bar
        };
        bar.set_prefix(prefix.into());
        Self { inner: bar }
    }

    /// Apply one progress update from the downloader.
    pub fn update(&self, progress: &DownloadProgress) {
        if self.inner.length() != Some(progress.total_bytes) {
            self.inner.set_length(progress.total_bytes);
        }
        self.inner.set_position(progress.downloaded_bytes);
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn download_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("━╸━")
}
