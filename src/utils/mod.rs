//! Utility helpers: atomic file writes, path suffixing, progress bars.

pub mod fs;
pub mod progress;

pub use fs::{atomic_write, ensure_dir, remove_dir_logged, remove_file_if_exists, with_suffix};
pub use progress::DownloadBar;
