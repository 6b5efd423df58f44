//! Selection of the release asset (and its detached signature) for the
//! running platform.
//!
//! Release assets follow a loose naming convention: the file name contains
//! the OS name and an architecture token, e.g. `gateway_linux_amd64.tar.gz`,
//! `gateway-darwin-arm64.zip` or `gateway_windows_x86_64.exe`, with signatures
//! next to them (`gateway_linux_amd64.tar.gz.sig`). Matching is substring
//! based and case-insensitive; both Go-style architecture names and their
//! common aliases are accepted.

use crate::core::UpdateError;
use crate::update::release::Asset;

/// Extensions that mark an asset as a detached signature.
pub const SIGNATURE_EXTENSIONS: &[&str] = &[".sig", ".asc"];

/// Extensions of installable artifacts and archives.
pub const BINARY_EXTENSIONS: &[&str] = &[".zip", ".tar.gz", ".tgz", ".exe", ".msi"];

/// Checksum sidecars published next to artifacts.
pub const DIGEST_EXTENSIONS: &[&str] = &[".sha256", ".sha512", ".sha1", ".md5", ".b3"];

/// The OS / architecture pair a build targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Go-style OS name: `linux`, `darwin`, `windows`, ...
    pub os: String,
    /// Go-style architecture name: `amd64`, `arm64`, `386`, `arm`, ...
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }

    /// Every OS spelling that identifies this platform in an asset name.
    pub fn os_tokens(&self) -> Vec<&str> {
        match self.os.as_str() {
            "darwin" => vec!["darwin", "macos"],
            other => vec![other],
        }
    }

    /// The architecture name and its aliases.
    pub fn arch_tokens(&self) -> Vec<&str> {
        match self.arch.as_str() {
            "amd64" => vec!["amd64", "x86_64"],
            "arm64" => vec!["arm64", "aarch64"],
            "386" => vec!["386", "i386", "i686"],
            "arm" => vec!["arm", "armv7", "armv6", "armhf"],
            other => vec![other],
        }
    }

    fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.os_tokens().iter().any(|os| name.contains(os))
            && self.arch_tokens().iter().any(|arch| contains_arch(&name, arch))
    }
}

/// Substring match that refuses a token directly followed by a digit, so
/// `arm` does not match `arm64`.
fn contains_arch(name: &str, token: &str) -> bool {
    name.match_indices(token)
        .any(|(start, _)| !name[start + token.len()..].starts_with(|c: char| c.is_ascii_digit()))
}

/// The assets chosen for a platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectedAssets<'a> {
    pub binary: Option<&'a Asset>,
    pub signature: Option<&'a Asset>,
}

impl<'a> SelectedAssets<'a> {
    /// The binary asset, or a "no suitable binary" error.
    pub fn require_binary(&self, platform: &Platform) -> Result<&'a Asset, UpdateError> {
        self.binary.ok_or_else(|| UpdateError::NoSuitableAsset {
            os: platform.os.clone(),
            arch: platform.arch.clone(),
        })
    }
}

fn is_signature(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SIGNATURE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

fn has_binary_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// A raw executable: no extension at all, or a trailing segment that is
/// part of a version number (`gateway-linux-amd64-1.2.0`).
fn is_raw_binary(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if DIGEST_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }
    match lower.rsplit_once('.') {
        None => true,
        Some((_, tail)) => tail.starts_with(|c: char| c.is_ascii_digit()),
    }
}

/// The detached signature published for `binary`, if any.
fn signature_for<'a>(binary: &Asset, signatures: &[&'a Asset]) -> Option<&'a Asset> {
    signatures.iter().copied().find(|s| {
        SIGNATURE_EXTENSIONS
            .iter()
            .any(|ext| s.name.eq_ignore_ascii_case(&format!("{}{}", binary.name, ext)))
    })
}

/// Pick at most one binary and one signature asset for `platform`.
///
/// Archives and installers are preferred over raw executables. Among those,
/// an asset with its own signature (`<binary>.sig` or `<binary>.asc`) wins;
/// a signature is never paired with a different artifact.
pub fn select_assets<'a>(assets: &'a [Asset], platform: &Platform) -> SelectedAssets<'a> {
    let candidates: Vec<&Asset> = assets.iter().filter(|a| platform.matches(&a.name)).collect();
    let signatures: Vec<&Asset> =
        candidates.iter().copied().filter(|a| is_signature(&a.name)).collect();

    let packaged = candidates
        .iter()
        .copied()
        .filter(|a| !is_signature(&a.name) && has_binary_extension(&a.name));
    let raw = candidates
        .iter()
        .copied()
        .filter(|a| {
            !is_signature(&a.name) && !has_binary_extension(&a.name) && is_raw_binary(&a.name)
        });
    let binaries: Vec<&Asset> = packaged.chain(raw).collect();

    let signed = binaries
        .iter()
        .copied()
        .find_map(|b| signature_for(b, &signatures).map(|s| (b, s)));
    match signed {
        Some((binary, signature)) => SelectedAssets {
            binary: Some(binary),
            signature: Some(signature),
        },
        None => SelectedAssets {
            binary: binaries.first().copied(),
            signature: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            download_url: format!("https://example.com/{name}"),
            size: 1,
        }
    }

    fn release_assets() -> Vec<Asset> {
        vec![
            asset("checksums.txt"),
            asset("gateway_1.2.0_darwin_arm64.zip"),
            asset("gateway_1.2.0_darwin_arm64.zip.sig"),
            asset("gateway_1.2.0_linux_x86_64.tar.gz"),
            asset("gateway_1.2.0_linux_x86_64.tar.gz.asc"),
            asset("gateway_1.2.0_linux_arm64.tar.gz.sig"),
            asset("gateway_1.2.0_linux_arm64.tar.gz"),
            asset("gateway_1.2.0_windows_amd64.exe"),
            asset("gateway_1.2.0_windows_amd64.exe.sig"),
        ]
    }

    #[test]
    fn test_selects_by_alias() {
        let assets = release_assets();
        let selected = select_assets(&assets, &Platform::new("linux", "amd64"));
        assert_eq!(selected.binary.unwrap().name, "gateway_1.2.0_linux_x86_64.tar.gz");
        assert_eq!(selected.signature.unwrap().name, "gateway_1.2.0_linux_x86_64.tar.gz.asc");
    }

    #[test]
    fn test_signature_listed_before_binary() {
        let assets = release_assets();
        let selected = select_assets(&assets, &Platform::new("linux", "arm64"));
        assert_eq!(selected.binary.unwrap().name, "gateway_1.2.0_linux_arm64.tar.gz");
        assert_eq!(selected.signature.unwrap().name, "gateway_1.2.0_linux_arm64.tar.gz.sig");
    }

    #[test]
    fn test_darwin_and_windows() {
        let assets = release_assets();
        let mac = select_assets(&assets, &Platform::new("darwin", "arm64"));
        assert_eq!(mac.binary.unwrap().name, "gateway_1.2.0_darwin_arm64.zip");

        let win = select_assets(&assets, &Platform::new("windows", "amd64"));
        assert_eq!(win.binary.unwrap().name, "gateway_1.2.0_windows_amd64.exe");
        assert_eq!(win.signature.unwrap().name, "gateway_1.2.0_windows_amd64.exe.sig");
    }

    #[test]
    fn test_no_match_is_explicit_failure() {
        let assets = release_assets();
        let platform = Platform::new("freebsd", "riscv64");
        let selected = select_assets(&assets, &platform);
        assert!(selected.binary.is_none());
        assert!(matches!(
            selected.require_binary(&platform),
            Err(UpdateError::NoSuitableAsset { .. })
        ));
    }

    #[test]
    fn test_raw_binary_without_extension() {
        let assets = vec![asset("gateway-linux-amd64"), asset("gateway-linux-amd64.sig")];
        let selected = select_assets(&assets, &Platform::new("linux", "amd64"));
        assert_eq!(selected.binary.unwrap().name, "gateway-linux-amd64");
        assert_eq!(selected.signature.unwrap().name, "gateway-linux-amd64.sig");
    }

    #[test]
    fn test_unknown_extension_is_ignored() {
        let assets = vec![asset("gateway_linux_amd64.deb")];
        let selected = select_assets(&assets, &Platform::new("linux", "amd64"));
        assert!(selected.binary.is_none());
    }

    #[test]
    fn test_checksum_sidecar_is_never_the_binary() {
        let assets = vec![
            asset("gateway_linux_amd64.tar.gz.sha256"),
            asset("gateway_linux_amd64.tar.gz"),
            asset("gateway_linux_amd64.tar.gz.sig"),
        ];
        let selected = select_assets(&assets, &Platform::new("linux", "amd64"));
        assert_eq!(selected.binary.unwrap().name, "gateway_linux_amd64.tar.gz");
        assert_eq!(selected.signature.unwrap().name, "gateway_linux_amd64.tar.gz.sig");

        let only_digests = vec![asset("gateway_linux_amd64.sha512"), asset("gateway_linux_amd64.md5")];
        assert!(select_assets(&only_digests, &Platform::new("linux", "amd64")).binary.is_none());
    }

    #[test]
    fn test_archive_preferred_over_raw_binary() {
        let assets = vec![
            asset("gateway-linux-amd64-1.2.0"),
            asset("gateway-linux-amd64-1.2.0.tar.gz"),
        ];
        let selected = select_assets(&assets, &Platform::new("linux", "amd64"));
        assert_eq!(selected.binary.unwrap().name, "gateway-linux-amd64-1.2.0.tar.gz");
    }

    #[test]
    fn test_signed_artifact_wins_over_unsigned() {
        let assets = vec![
            asset("gateway_linux_amd64.tar.gz"),
            asset("gateway_linux_amd64.zip"),
            asset("gateway_linux_amd64.zip.sig"),
        ];
        let selected = select_assets(&assets, &Platform::new("linux", "amd64"));
        assert_eq!(selected.binary.unwrap().name, "gateway_linux_amd64.zip");
        assert_eq!(selected.signature.unwrap().name, "gateway_linux_amd64.zip.sig");
    }

    #[test]
    fn test_foreign_signature_is_not_attached() {
        let assets = vec![
            asset("gateway_linux_amd64.tar.gz"),
            asset("gateway_linux_amd64_debug.zip.sig"),
        ];
        let selected = select_assets(&assets, &Platform::new("linux", "amd64"));
        assert_eq!(selected.binary.unwrap().name, "gateway_linux_amd64.tar.gz");
        assert!(selected.signature.is_none());
    }

    #[test]
    fn test_arm_token_does_not_match_arm64() {
        let assets = vec![
            asset("gateway_linux_arm64.tar.gz"),
            asset("gateway_linux_arm.tar.gz"),
        ];
        let arm = select_assets(&assets, &Platform::new("linux", "arm"));
        assert_eq!(arm.binary.unwrap().name, "gateway_linux_arm.tar.gz");

        let armv7 = vec![asset("gateway_linux_armv7.tar.gz")];
        assert!(select_assets(&armv7, &Platform::new("linux", "arm")).binary.is_some());

        let arm64 = select_assets(&assets, &Platform::new("linux", "arm64"));
        assert_eq!(arm64.binary.unwrap().name, "gateway_linux_arm64.tar.gz");
    }

    #[test]
    fn test_current_platform_tokens() {
        let platform = Platform::current();
        assert!(!platform.os_tokens().is_empty());
        assert!(!platform.arch_tokens().is_empty());
    }
}
