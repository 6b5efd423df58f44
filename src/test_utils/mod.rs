//! Test utilities for the updater
//!
//! Helpers shared by unit tests and the integration suite:
//! - logging setup that plays well with the test harness
//! - a deterministic release-signing key and signing helpers
//! - [`ReleaseServer`], a local HTTP server standing in for the release feed
//!   and the asset host
//!
//! # Example
//!
//! ```rust,no_run
//! use gateway_update::test_utils::{ReleaseServer, init_test_logging};
//!
//! # async fn example() {
//! init_test_logging(None);
//! let server = ReleaseServer::start().await;
//! server.set("/repos/gateway-dev/gateway/releases/latest", 404, "{}");
//! # }
//! ```

pub mod server;

pub use server::ReleaseServer;

use ed25519_dalek::{Signature, Signer, SigningKey};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::update::verification::TrustAnchor;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither set, tests
/// run silently.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

/// Deterministic release-signing key derived from `seed`.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Trust anchor containing only `key`'s public half.
pub fn trust_anchor_for(key: &SigningKey) -> TrustAnchor {
    TrustAnchor::from_keys(vec![key.verifying_key()])
}

/// Sign `bytes` the way releases are signed (over the SHA-256 digest).
pub fn sign_bytes(key: &SigningKey, bytes: &[u8]) -> Signature {
    let digest = Sha256::digest(bytes);
    key.sign(digest.as_slice())
}

/// Sign the file at `path`.
///
/// # Panics
///
/// Panics if the file cannot be read.
pub fn sign_file(key: &SigningKey, path: &Path) -> Signature {
    let bytes = std::fs::read(path)
        .unwrap_or_else(|e| panic!("Failed to read {} for signing: {e}", path.display()));
    sign_bytes(key, &bytes)
}

/// Payload of a plausible release binary: `size` bytes starting with `marker`.
pub fn fake_binary(marker: &str, size: usize) -> Vec<u8> {
    let mut bytes = marker.as_bytes().to_vec();
    bytes.resize(size.max(marker.len()), b'.');
    bytes
}
