use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::constants::MIN_ARTIFACT_SIZE;
use crate::update::download::DownloadResult;

/// Armor markers for public keys in the trust anchor.
const PUBLIC_KEY_BEGIN: &str = "-----BEGIN GATEWAY PUBLIC KEY-----";
const PUBLIC_KEY_END: &str = "-----END GATEWAY PUBLIC KEY-----";

/// Armor markers for detached signatures.
const SIGNATURE_BEGIN: &str = "-----BEGIN GATEWAY SIGNATURE-----";
const SIGNATURE_END: &str = "-----END GATEWAY SIGNATURE-----";

/// Release signing keys compiled into the binary.
///
/// Release engineering replaces the placeholder with the armored public
/// key(s) of the release signing keypair. Until then every signature check
/// fails with "verifier not configured".
pub const EMBEDDED_TRUST_ANCHOR: &str = "REPLACE_WITH_RELEASE_SIGNING_PUBLIC_KEY";

/// Outcome of verifying a downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub valid: bool,
    pub message: String,
    /// Hex SHA-256 of the artifact; empty if it could not be computed.
    pub checksum: String,
}

impl VerifyResult {
    fn invalid(message: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            checksum: checksum.into(),
        }
    }
}

/// Computes and compares SHA-256 checksums of files.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Compute the SHA-256 digest of a file, streaming it in chunks.
    pub async fn digest(file_path: &Path) -> std::io::Result<[u8; 32]> {
        debug!("Computing SHA256 checksum for: {:?}", file_path);

        let mut file = tokio::fs::File::open(file_path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().into())
    }

    /// Compute the lowercase hex SHA-256 checksum of a file.
    pub async fn compute_sha256(file_path: &Path) -> std::io::Result<String> {
        Ok(hex::encode(Self::digest(file_path).await?))
    }

    /// Verify a file against an expected checksum.
    ///
    /// The comparison is case-insensitive and accepts an optional `sha256:`
    /// prefix on `expected_checksum`. Invalidity is reported in the result.
    pub async fn verify_checksum(file_path: &Path, expected_checksum: &str) -> VerifyResult {
        info!("Verifying checksum for: {:?}", file_path);

        let actual = match Self::compute_sha256(file_path).await {
            Ok(actual) => actual,
            Err(e) => {
                return VerifyResult::invalid(
                    format!("Failed to compute checksum of {}: {e}", file_path.display()),
                    "",
                );
            }
        };

        let expected = expected_checksum.trim();
        let expected = expected.strip_prefix("sha256:").unwrap_or(expected);

        if actual.eq_ignore_ascii_case(expected) {
            info!("Checksum verification successful");
            VerifyResult {
                valid: true,
                message: "Checksum matches".to_string(),
                checksum: actual,
            }
        } else {
            VerifyResult::invalid(
                format!("Checksum verification failed: expected {expected}, got {actual}"),
                actual,
            )
        }
    }
}

/// Extract the base64 payload of an armored block, or the whole text when it
/// carries no armor.
fn armored_blocks<'a>(text: &'a str, begin: &str, end: &str) -> Vec<String> {
    if !text.contains(begin) {
        let bare: String = text.split_whitespace().collect();
        return if bare.is_empty() { Vec::new() } else { vec![bare] };
    }

    let mut blocks = Vec::new();
    let mut rest: &'a str = text;
    while let Some(start) = rest.find(begin) {
        let after = &rest[start + begin.len()..];
        let Some(stop) = after.find(end) else {
            break;
        };
        let body: String = after[..stop]
            .lines()
            .map(str::trim)
            // Armor headers ("Key: value") are informational.
            .filter(|line| !line.contains(':'))
            .collect();
        blocks.push(body);
        rest = &after[stop + end.len()..];
    }
    blocks
}

/// The keyring signatures are verified against.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchor {
    keys: Vec<VerifyingKey>,
}

impl TrustAnchor {
    /// The anchor compiled into this binary.
    pub fn embedded() -> Self {
        Self::from_armored(EMBEDDED_TRUST_ANCHOR)
    }

    /// Parse one or more armored (or bare base64) Ed25519 public keys.
    ///
    /// Anything that does not decode to a valid 32-byte key is skipped with
    /// a warning; a placeholder therefore yields an unconfigured anchor.
    pub fn from_armored(text: &str) -> Self {
        let keys = armored_blocks(text, PUBLIC_KEY_BEGIN, PUBLIC_KEY_END)
            .iter()
            .filter_map(|block| {
                let bytes = STANDARD.decode(block).ok()?;
                let bytes: [u8; 32] = bytes.try_into().ok()?;
                match VerifyingKey::from_bytes(&bytes) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(error = %e, "Ignoring invalid trust anchor key");
                        None
                    }
                }
            })
            .collect();
        Self {
            keys,
        }
    }

    pub fn from_keys(keys: Vec<VerifyingKey>) -> Self {
        Self {
            keys,
        }
    }

    /// False while the anchor is still a placeholder.
    pub fn is_configured(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Whether any key of the keyring produced `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.keys.iter().any(|key| key.verify_strict(message, signature).is_ok())
    }
}

/// Armor a public key the way [`TrustAnchor::from_armored`] reads it.
pub fn armor_public_key(key: &VerifyingKey) -> String {
    format!("{PUBLIC_KEY_BEGIN}\n{}\n{PUBLIC_KEY_END}\n", STANDARD.encode(key.as_bytes()))
}

/// Armor a detached signature.
pub fn armor_signature(signature: &Signature) -> String {
    format!("{SIGNATURE_BEGIN}\n{}\n{SIGNATURE_END}\n", STANDARD.encode(signature.to_bytes()))
}

/// Decode a detached signature in binary (64 raw bytes) or armored form.
pub fn parse_signature(raw: &[u8]) -> Option<Signature> {
    if raw.len() == Signature::BYTE_SIZE
        && let Ok(signature) = Signature::from_slice(raw)
    {
        return Some(signature);
    }

    let text = std::str::from_utf8(raw).ok()?;
    armored_blocks(text, SIGNATURE_BEGIN, SIGNATURE_END).iter().find_map(|block| {
        let bytes = STANDARD.decode(block).ok()?;
        Signature::from_slice(&bytes).ok()
    })
}

/// Verifies downloaded artifacts before they may be installed.
///
/// The policy is fail-closed: a result is only valid when the file is
/// present, plausibly sized, checksummed, and carries a detached signature
/// made by a key of the trust anchor. The signature covers the artifact's
/// raw SHA-256 digest.
#[derive(Debug, Clone)]
pub struct Verifier {
    anchor: TrustAnchor,
    min_size: u64,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(TrustAnchor::embedded())
    }
}

impl Verifier {
    pub fn new(anchor: TrustAnchor) -> Self {
        Self {
            anchor,
            min_size: MIN_ARTIFACT_SIZE,
        }
    }

    #[must_use]
    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    /// Verify a download. Never fails: invalidity is reported in the result.
    pub async fn verify_download(&self, download: &DownloadResult) -> VerifyResult {
        let path = &download.path;

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) | Err(_) => {
                return VerifyResult::invalid(
                    format!("Downloaded file not found: {}", path.display()),
                    "",
                );
            }
        };

        if metadata.len() < self.min_size {
            return VerifyResult::invalid(
                format!(
                    "Downloaded file is too small to be a valid binary ({} bytes, minimum {})",
                    metadata.len(),
                    self.min_size
                ),
                "",
            );
        }

        let digest = match ChecksumVerifier::digest(path).await {
            Ok(digest) => digest,
            Err(e) => {
                return VerifyResult::invalid(format!("Failed to compute checksum: {e}"), "");
            }
        };
        let checksum = hex::encode(digest);
        info!(version = %download.version, %checksum, "Computed artifact checksum");

        let Some(signature_path) = &download.signature_path else {
            warn!("Release has no signature; refusing to install");
            return VerifyResult::invalid(
                "No signature available for this release; refusing to install an unverified binary",
                checksum,
            );
        };

        if !self.anchor.is_configured() {
            return VerifyResult::invalid(
                "Signature verifier not configured: no release signing key is embedded in this build",
                checksum,
            );
        }

        let raw = match tokio::fs::read(signature_path).await {
            Ok(raw) => raw,
            Err(e) => {
                return VerifyResult::invalid(format!("Failed to read signature: {e}"), checksum);
            }
        };

        let Some(signature) = parse_signature(&raw) else {
            return VerifyResult::invalid("Signature file is malformed", checksum);
        };

        if self.anchor.verify(&digest, &signature) {
            info!("Signature verification successful");
            VerifyResult {
                valid: true,
                message: "Signature verified".to_string(),
                checksum,
            }
        } else {
            VerifyResult::invalid(
                "Signature verification failed: not signed by a trusted release key",
                checksum,
            )
        }
    }
}
