//! Turning a downloaded artifact into an installable executable.
//!
//! Archives are extracted next to the artifact (inside the private download
//! directory). Every entry name is checked before anything is written: an
//! entry that would land outside the extraction directory aborts the whole
//! extraction.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::core::UpdateError;
use crate::utils::fs::{ensure_dir, set_executable};

/// Kind of artifact, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Zip,
    TarGz,
    /// Installer or raw binary, installed as-is.
    Executable,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            Self::Zip
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else {
            Self::Executable
        }
    }
}

/// Prepare `artifact` for installation and return the executable's path.
///
/// `binary_names` are the product's executable names used to pick the
/// executable out of an archive.
pub async fn prepare_artifact(artifact: &Path, binary_names: &[String]) -> Result<PathBuf> {
    let artifact = artifact.to_path_buf();
    let names = binary_names.to_vec();
    tokio::task::spawn_blocking(move || prepare_artifact_blocking(&artifact, &names))
        .await
        .context("spawn_blocking panicked")?
}

fn prepare_artifact_blocking(artifact: &Path, binary_names: &[String]) -> Result<PathBuf> {
    let dest = artifact
        .parent()
        .with_context(|| format!("Artifact has no parent directory: {}", artifact.display()))?;

    match ArtifactKind::from_path(artifact) {
        ArtifactKind::Zip => {
            let extracted = extract_zip(artifact, &dest.join("extracted"))?;
            find_executable(artifact, &extracted, binary_names)
        }
        ArtifactKind::TarGz => {
            let extracted = extract_tar_gz(artifact, &dest.join("extracted"))?;
            find_executable(artifact, &extracted, binary_names)
        }
        ArtifactKind::Executable => {
            set_executable(artifact)?;
            debug!(path = %artifact.display(), "Artifact is already executable");
            Ok(artifact.to_path_buf())
        }
    }
}

/// Resolve an archive entry name inside `dest`, refusing anything that escapes it.
pub fn safe_entry_path(dest: &Path, entry_name: &str) -> Result<PathBuf, UpdateError> {
    let unsafe_entry = || UpdateError::UnsafeArchiveEntry {
        entry: entry_name.to_string(),
    };

    // Archives written on Windows may use backslashes.
    let normalized = entry_name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry());
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(unsafe_entry());
    }
    Ok(dest.join(relative))
}

/// Directory entries such as `./` that name the archive root itself.
fn is_root_entry(name: &str) -> bool {
    name.replace('\\', "/").split('/').all(|part| part.is_empty() || part == ".")
}

/// Extract a zip archive into `dest`, returning the extracted file paths.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip archive {}", archive_path.display()))?;

    // Validate every name up front so a bad entry writes nothing at all.
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).context("Failed to read zip entry")?;
        if entry.is_dir() && is_root_entry(entry.name()) {
            continue;
        }
        safe_entry_path(dest, entry.name())?;
        if entry.enclosed_name().is_none() {
            return Err(UpdateError::UnsafeArchiveEntry {
                entry: entry.name().to_string(),
            }
            .into());
        }
    }

    ensure_dir(dest)?;
    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Failed to read zip entry")?;
        if entry.is_dir() && is_root_entry(entry.name()) {
            continue;
        }
        let out_path = safe_entry_path(dest, entry.name())?;

        if entry.is_dir() {
            ensure_dir(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            ensure_dir(parent)?;
        }

        let mut out = File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {}", entry.name()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                .with_context(|| format!("Failed to set mode on {}", out_path.display()))?;
        }

        extracted.push(out_path);
    }

    info!(count = extracted.len(), "Extracted zip archive");
    Ok(extracted)
}

/// Extract a gzip-compressed tarball into `dest`, restoring file modes.
pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let open = || -> Result<tar::Archive<flate2::read::GzDecoder<File>>> {
        let file = File::open(archive_path)
            .with_context(|| format!("Failed to open {}", archive_path.display()))?;
        Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
    };

    // First pass: validate names and entry types before writing anything.
    let mut archive = open()?;
    for entry in archive.entries().context("Failed to read tar entries")? {
        let entry = entry.context("Failed to read tar entry")?;
        let name = entry_name(&entry)?;
        let kind = entry.header().entry_type();
        if (kind.is_dir() && is_root_entry(&name)) || kind.is_pax_global_extensions() {
            continue;
        }
        safe_entry_path(dest, &name)?;

        if !(kind.is_file() || kind.is_dir()) {
            return Err(UpdateError::UnsupportedArchiveEntry {
                entry: name,
                kind: format!("{kind:?}"),
            }
            .into());
        }
    }

    ensure_dir(dest)?;
    let mut extracted = Vec::new();
    let mut archive = open()?;
    for entry in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let name = entry_name(&entry)?;
        let kind = entry.header().entry_type();
        if (kind.is_dir() && is_root_entry(&name)) || kind.is_pax_global_extensions() {
            continue;
        }
        let out_path = safe_entry_path(dest, &name)?;

        if kind.is_dir() {
            ensure_dir(&out_path)?;
            continue;
        }
        if !kind.is_file() {
            continue;
        }
        if let Some(parent) = out_path.parent() {
            ensure_dir(parent)?;
        }

        let mut out = File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out).with_context(|| format!("Failed to extract {name}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = entry.header().mode().unwrap_or(0o644);
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                .with_context(|| format!("Failed to set mode on {}", out_path.display()))?;
        }

        extracted.push(out_path);
    }

    info!(count = extracted.len(), "Extracted tar.gz archive");
    Ok(extracted)
}

fn entry_name<R: io::Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    Ok(entry.path().context("Failed to read tar entry path")?.to_string_lossy().into_owned())
}

/// Whether `path` looks like the product executable.
fn is_executable_name(path: &Path, binary_names: &[String]) -> bool {
    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase())
    else {
        return false;
    };

    if cfg!(windows) {
        return file_name.ends_with(".exe");
    }

    // Documentation and other files with a real extension never qualify.
    if let Some((_, ext)) = file_name.rsplit_once('.')
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphabetic())
    {
        return false;
    }

    binary_names.iter().any(|name| {
        let name = name.to_ascii_lowercase();
        file_name == name
            || (file_name.starts_with(&name) && file_name[name.len()..].starts_with(['-', '_']))
    })
}

fn find_executable(archive: &Path, extracted: &[PathBuf], binary_names: &[String]) -> Result<PathBuf> {
    let executable = extracted
        .iter()
        .find(|path| is_executable_name(path, binary_names))
        .cloned()
        .ok_or_else(|| UpdateError::ExecutableNotFound {
            archive: archive.display().to_string(),
        })?;

    set_executable(&executable)?;
    info!(path = %executable.display(), "Found executable in archive");
    Ok(executable)
}
