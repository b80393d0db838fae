// pkd-core/src/stage.rs
//! Opening a fetched artifact and locating the package inside it.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use pkd_common::error::{PkdError, Result};
use tracing::{debug, error, warn};

use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Dmg,
    Zip,
    Pkg,
}

/// Determines the container type from the file extension, falling back to
/// content sniffing for downloads without a usable extension.
pub fn detect_container(path: &Path) -> Result<ContainerKind> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if let Some(kind) = kind_for_extension(&extension) {
        debug!("Using file extension for type detection: {}", extension);
        return Ok(kind);
    }

    debug!(
        "Download path '{}' has no definite extension ('{}'), attempting content detection.",
        path.display(),
        extension
    );
    let detected = infer::get_from_path(path)?;
    match detected.and_then(|kind| kind_for_extension(kind.extension())) {
        Some(kind) => Ok(kind),
        None => {
            error!(
                "Could not determine container type for: {}",
                path.display()
            );
            Err(PkdError::InstallError(format!(
                "Unsupported container type for download: {}",
                path.display()
            )))
        }
    }
}

fn kind_for_extension(extension: &str) -> Option<ContainerKind> {
    match extension {
        "dmg" => Some(ContainerKind::Dmg),
        "zip" => Some(ContainerKind::Zip),
        "pkg" | "mpkg" | "xar" => Some(ContainerKind::Pkg),
        _ => None,
    }
}

/// Extracts a zip archive into `dest`, refusing entries that would land
/// outside of it.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    debug!(
        "Extracting ZIP {} to {}",
        archive_path.display(),
        dest.display()
    );
    let zip_err =
        |e: zip::result::ZipError| PkdError::InstallError(format!("Failed to read zip archive: {e}"));
    let mut archive = zip::ZipArchive::new(File::open(archive_path)?).map_err(zip_err)?;
    fs::create_dir_all(dest)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        apply_mode(&out_path, entry.unix_mode())?;
    }
    debug!("Extracted {} entries", archive.len());
    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Resolves a relative `pkg` path inside `root`. The result must exist and
/// must not escape `root`, also not through symlinks.
pub fn resolve_target(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(PkdError::InstallError(format!(
            "Package path '{relative}' must stay inside the artifact"
        )));
    }
    let candidate = root.join(rel);
    if !candidate.exists() {
        return Err(PkdError::InstallError(format!(
            "Package '{}' not found in {}",
            relative,
            root.display()
        )));
    }
    let canonical_root = root.canonicalize()?;
    let canonical = candidate.canonicalize()?;
    if !canonical.starts_with(&canonical_root) {
        return Err(PkdError::InstallError(format!(
            "Package path '{relative}' resolves outside the artifact"
        )));
    }
    Ok(candidate)
}

/// A disk image attached for the lifetime of this value.
pub struct MountedImage<'a> {
    platform: &'a dyn Platform,
    mount_point: PathBuf,
}

impl<'a> MountedImage<'a> {
    pub fn attach(platform: &'a dyn Platform, image: &Path) -> Result<Self> {
        let mount_point = platform.attach_image(image)?;
        Ok(Self {
            platform,
            mount_point,
        })
    }

    pub fn path(&self) -> &Path {
        &self.mount_point
    }
}

impl Drop for MountedImage<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.platform.detach_image(&self.mount_point) {
            warn!(
                "Failed to detach image at {}: {}",
                self.mount_point.display(),
                e
            );
        }
    }
}
