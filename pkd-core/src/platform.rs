// pkd-core/src/platform.rs
//! The seam between the executor and the operating system's package tools.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use pkd_common::error::{PkdError, Result};
use pkd_common::model::PkgTarget;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::process::{privileged, run_command, stderr_text};

const NO_RECEIPT_MARKER: &str = "No receipt for";

/// Platform operations the executor needs. Every method blocks; the executor
/// calls them from the blocking thread pool.
pub trait Platform: Send + Sync {
    /// Attaches a disk image read-only and returns its mount point.
    fn attach_image(&self, image: &Path) -> Result<PathBuf>;

    fn detach_image(&self, mount_point: &Path) -> Result<()>;

    /// Runs the platform installer on `pkg`. A non-zero result is an
    /// `InstallerInvocationError` carrying the exit code and stderr.
    fn install_pkg(&self, token: &str, pkg: &Path, target: &PkgTarget) -> Result<()>;

    /// Absolute paths of the files the receipt database lists for `id`.
    /// Unknown ids yield an empty list.
    fn pkg_files(&self, id: &str) -> Result<Vec<PathBuf>>;

    /// Removes the receipt for `id`. Unknown ids are not an error.
    fn forget_pkg(&self, id: &str) -> Result<()>;
}

/// macOS implementation backed by `hdiutil`, `installer` and `pkgutil`.
#[derive(Debug, Clone)]
pub struct MacPlatform {
    install_target: String,
    use_sudo: bool,
}

impl MacPlatform {
    pub fn new(install_target: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            install_target: install_target.into(),
            use_sudo,
        }
    }

    pub fn from_config(config: &pkd_common::Config) -> Self {
        Self::new(config.install_target.clone(), config.use_sudo)
    }
}

impl Platform for MacPlatform {
    fn attach_image(&self, image: &Path) -> Result<PathBuf> {
        debug!("Mounting DMG: {}", image.display());
        let args: Vec<OsString> = vec![
            "attach".into(),
            "-plist".into(),
            "-nobrowse".into(),
            "-readonly".into(),
            "-noautoopen".into(),
            "-mountrandom".into(),
            std::env::temp_dir().into_os_string(),
            image.as_os_str().to_os_string(),
        ];
        let output = run_command("hdiutil", &args)?;
        if !output.status.success() {
            let stderr = stderr_text(&output);
            error!("hdiutil attach failed for {}: {}", image.display(), stderr);
            return Err(PkdError::InstallError(format!(
                "Failed to mount DMG '{}': {}",
                image.display(),
                stderr
            )));
        }
        let mount_point = parse_mount_point(&output.stdout)?;
        debug!("DMG mounted at: {}", mount_point.display());
        Ok(mount_point)
    }

    fn detach_image(&self, mount_point: &Path) -> Result<()> {
        debug!("Unmounting DMG from: {}", mount_point.display());
        let output = run_command(
            "hdiutil",
            &["detach".into(), "-force".into(), mount_point.into()],
        )?;
        if output.status.success() {
            return Ok(());
        }
        debug!(
            "hdiutil detach failed ({}): {}. Trying diskutil...",
            output.status,
            stderr_text(&output)
        );
        let fallback = run_command(
            "diskutil",
            &["unmount".into(), "force".into(), mount_point.into()],
        )?;
        if fallback.status.success() {
            Ok(())
        } else {
            Err(PkdError::InstallError(format!(
                "Failed to unmount '{}' using hdiutil and diskutil: {}",
                mount_point.display(),
                stderr_text(&fallback)
            )))
        }
    }

    fn install_pkg(&self, token: &str, pkg: &Path, target: &PkgTarget) -> Result<()> {
        let mut args: Vec<OsString> = vec![
            "-pkg".into(),
            pkg.into(),
            "-target".into(),
            self.install_target.clone().into(),
        ];
        if target.allow_untrusted {
            args.push("-allowUntrusted".into());
        }
        let (program, args) = privileged(self.use_sudo, "installer", args);
        debug!("Executing: {} {:?}", program, args);

        let output = run_command(&program, &args).map_err(|e| {
            PkdError::InstallerInvocationError {
                token: token.to_string(),
                status: None,
                detail: format!("failed to execute {program}: {e}"),
            }
        })?;
        if !output.status.success() {
            let stderr = stderr_text(&output);
            error!("installer failed ({}): {}", output.status, stderr);
            return Err(PkdError::InstallerInvocationError {
                token: token.to_string(),
                status: output.status.code(),
                detail: stderr,
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Installer stdout:\n{}", stdout.trim());
        }
        Ok(())
    }

    fn pkg_files(&self, id: &str) -> Result<Vec<PathBuf>> {
        let info = run_command("pkgutil", &["--pkg-info-plist".into(), id.into()])?;
        if !info.status.success() {
            let stderr = stderr_text(&info);
            if stderr.contains(NO_RECEIPT_MARKER) {
                debug!("No receipt for {}, nothing to list", id);
                return Ok(Vec::new());
            }
            return Err(PkdError::CommandExecError(format!(
                "pkgutil --pkg-info-plist {id} failed: {stderr}"
            )));
        }
        let base = parse_pkg_base(&info.stdout)?;

        let files = run_command(
            "pkgutil",
            &["--only-files".into(), "--files".into(), id.into()],
        )?;
        if !files.status.success() {
            return Err(PkdError::CommandExecError(format!(
                "pkgutil --files {id} failed: {}",
                stderr_text(&files)
            )));
        }
        Ok(join_listing(&base, &String::from_utf8_lossy(&files.stdout)))
    }

    fn forget_pkg(&self, id: &str) -> Result<()> {
        debug!("Forgetting package receipt: {}", id);
        let (program, args) = privileged(self.use_sudo, "pkgutil", vec!["--forget".into(), id.into()]);
        let output = run_command(&program, &args)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_text(&output);
        if stderr.contains(NO_RECEIPT_MARKER) || stderr.is_empty() {
            debug!("Package receipt {} already forgotten or never existed.", id);
            Ok(())
        } else {
            warn!("Failed to forget package receipt {}: {}", id, stderr);
            Err(PkdError::CommandExecError(format!(
                "pkgutil --forget {id} failed: {stderr}"
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct AttachOutput {
    #[serde(rename = "system-entities", default)]
    system_entities: Vec<SystemEntity>,
}

#[derive(Debug, Deserialize)]
struct SystemEntity {
    #[serde(rename = "mount-point")]
    mount_point: Option<PathBuf>,
}

fn parse_mount_point(plist_bytes: &[u8]) -> Result<PathBuf> {
    let parsed: AttachOutput = plist::from_bytes(plist_bytes).map_err(|e| {
        PkdError::InstallError(format!("Failed to parse hdiutil output: {e}"))
    })?;
    parsed
        .system_entities
        .into_iter()
        .find_map(|entity| entity.mount_point)
        .ok_or_else(|| {
            PkdError::InstallError(
                "Failed to determine mount point from hdiutil output".to_string(),
            )
        })
}

#[derive(Debug, Deserialize)]
struct PkgInfo {
    volume: String,
    #[serde(rename = "install-location", default)]
    install_location: Option<String>,
}

fn parse_pkg_base(plist_bytes: &[u8]) -> Result<PathBuf> {
    let info: PkgInfo = plist::from_bytes(plist_bytes).map_err(|e| {
        PkdError::CommandExecError(format!("Failed to parse pkgutil output: {e}"))
    })?;
    let mut base = PathBuf::from(info.volume);
    if let Some(location) = info.install_location.filter(|l| !l.is_empty()) {
        base.push(location.trim_start_matches('/'));
    }
    Ok(base)
}

fn join_listing(base: &Path, listing: &str) -> Vec<PathBuf> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| base.join(line))
        .collect()
}
