//! Global constants used throughout the updater.
//!
//! Timeouts, thresholds and file names that are shared by more than one
//! module live here so that the numbers are discoverable in one place.

use std::time::Duration;

/// Timeout for release-feed metadata requests.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for artifact downloads. Gateway bundles can be several hundred
/// megabytes, so this is generous.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default timeout for acquiring the update state lock.
pub const STATE_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum backoff delay in milliseconds for lock acquisition.
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Starting backoff delay in milliseconds for lock acquisition.
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Smallest artifact accepted as a plausible binary (1 MiB).
pub const MIN_ARTIFACT_SIZE: u64 = 1024 * 1024;

/// Number of rapid startups that constitutes a crash loop.
pub const CRASH_LOOP_THRESHOLD: usize = 3;

/// Window, in seconds, within which startups count towards a crash loop.
pub const RAPID_RESTART_WINDOW_SECS: u64 = 30;

/// Seconds a process must stay up before it is considered healthy.
pub const HEALTHY_GRACE_PERIOD_SECS: u64 = 30;

/// Default interval between background update checks (6 hours).
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 6 * 60 * 60;

/// Default delay before the poller's first check.
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 60;

/// Backups older than this many days are considered expired.
pub const ROLLBACK_RETENTION_DAYS: i64 = 30;

/// Version string reported by development builds. Never considered outdated.
pub const DEV_VERSION: &str = "dev";

/// User agent sent with every HTTP request.
pub const USER_AGENT: &str = concat!("gateway-update/", env!("CARGO_PKG_VERSION"));

/// Suffix of the recovery backup kept next to the installed executable.
pub const BACKUP_SUFFIX: &str = "old";

/// Suffix given to a binary that was rolled back.
pub const FAILED_SUFFIX: &str = "failed";

/// File names inside the `updates/` state directory.
pub const ROLLBACK_FILE: &str = "rollback.json";
pub const HEALTH_FILE: &str = "health.json";
pub const PENDING_FILE: &str = "pending.json";
