// pkd-core/src/uninstall.rs
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use pkd_common::config::Config;
use pkd_common::error::{PkdError, Result};
use pkd_common::lifecycle::{InstallState, LifecycleEvent};
use pkd_common::model::RemovalSpec;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::platform::Platform;
use crate::process::{privileged, run_command, stderr_text};
use crate::receipt::{find_receipt, InstallReceipt};

lazy_static! {
    static ref VALID_PKGID_RE: Regex = Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallOptions {
    /// Also run the `zap` directives recorded at install time.
    pub zap: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UninstallReport {
    pub token: String,
    pub version: String,
    pub removed: Vec<PathBuf>,
    pub forgotten: Vec<String>,
}

impl Executor {
    /// Reverses a recorded install using the directives stored in its receipt.
    ///
    /// Individual removal failures do not stop the run; they are collected and
    /// returned together, and the receipt is kept so the uninstall can be retried.
    pub async fn uninstall(&self, token: &str, options: UninstallOptions) -> Result<UninstallReport> {
        let guard = self.locks.acquire(token).await;

        let Some(receipt) = find_receipt(&self.config, token)? else {
            warn!("No install receipt for '{}'", token);
            return Err(PkdError::UninstallRecordMissing(token.to_string()));
        };
        self.state.observe(token, InstallState::Installed);
        self.state.emit(LifecycleEvent::UninstallStarted {
            token: token.to_string(),
            version: receipt.version.clone(),
        });

        let config = self.config.clone();
        let platform = Arc::clone(&self.platform);
        let state = Arc::clone(&self.state);
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let token = receipt.token.as_str();
            match remove_installed(&config, platform.as_ref(), &receipt, options) {
                Ok(report) => {
                    state.transition(token, InstallState::Uninstalled)?;
                    state.emit(LifecycleEvent::UninstallFinished {
                        token: token.to_string(),
                        version: report.version.clone(),
                    });
                    info!("Uninstalled '{}' {}", token, report.version);
                    Ok(report)
                }
                Err(e) => {
                    error!("Uninstall of '{}' failed: {}", token, e);
                    state.emit(LifecycleEvent::failed(token, &e));
                    Err(e)
                }
            }
        });

        handle.await.unwrap_or_else(|e| {
            Err(PkdError::UninstallError(
                token.to_string(),
                format!("uninstall task did not complete: {e}"),
            ))
        })
    }
}

fn remove_installed(
    config: &Config,
    platform: &dyn Platform,
    receipt: &InstallReceipt,
    options: UninstallOptions,
) -> Result<UninstallReport> {
    let home = config.home_dir();
    let mut report = UninstallReport {
        token: receipt.token.clone(),
        version: receipt.version.clone(),
        ..Default::default()
    };
    let mut errors: Vec<String> = Vec::new();

    debug!("Running uninstall directives for '{}'", receipt.token);
    apply_removal(&receipt.uninstall, config, platform, home, &mut report, &mut errors);

    if options.zap {
        match &receipt.zap {
            Some(zap) => {
                debug!("Running zap directives for '{}'", receipt.token);
                apply_removal(zap, config, platform, home, &mut report, &mut errors);
            }
            None => debug!("'{}' declares no zap directives", receipt.token),
        }
    }

    if !errors.is_empty() {
        return Err(PkdError::UninstallError(
            receipt.token.clone(),
            errors.join("; "),
        ));
    }

    let token_dir = receipt.token_dir(config);
    debug!("Removing Caskroom directory {}", token_dir.display());
    if let Err(e) = remove_filesystem_artifact(&token_dir, false) {
        return Err(PkdError::UninstallError(receipt.token.clone(), e));
    }
    Ok(report)
}

/// Runs one `uninstall`/`zap` block: package receipts first, then `delete`,
/// `rmdir` and `trash` paths.
fn apply_removal(
    spec: &RemovalSpec,
    config: &Config,
    platform: &dyn Platform,
    home: &Path,
    report: &mut UninstallReport,
    errors: &mut Vec<String>,
) {
    for id in &spec.pkgutil {
        if !VALID_PKGID_RE.is_match(id) {
            error!("Invalid pkgutil ID format: '{}'. Skipping.", id);
            errors.push(format!("invalid pkgutil ID '{id}'"));
            continue;
        }
        match platform.pkg_files(id) {
            Ok(files) => {
                debug!("Removing {} files of package {}", files.len(), id);
                for file in files {
                    match remove_filesystem_artifact(&file, config.use_sudo) {
                        Ok(()) => report.removed.push(file),
                        Err(e) => errors.push(e),
                    }
                }
            }
            Err(e) => {
                errors.push(format!("listing files of {id}: {e}"));
                continue;
            }
        }
        match platform.forget_pkg(id) {
            Ok(()) => report.forgotten.push(id.clone()),
            Err(e) => errors.push(format!("forgetting {id}: {e}")),
        }
    }

    for raw in &spec.delete {
        match checked_path(raw, home) {
            Ok(path) => match remove_filesystem_artifact(&path, config.use_sudo) {
                Ok(()) => report.removed.push(path),
                Err(e) => errors.push(e),
            },
            Err(e) => errors.push(e),
        }
    }

    for raw in &spec.rmdir {
        match checked_path(raw, home) {
            Ok(path) => match remove_empty_dir(&path) {
                Ok(true) => report.removed.push(path),
                Ok(false) => {}
                Err(e) => errors.push(e),
            },
            Err(e) => errors.push(e),
        }
    }

    for raw in &spec.trash {
        match checked_path(raw, home) {
            Ok(path) => match trash_path(&path, config.use_sudo) {
                Ok(true) => report.removed.push(path),
                Ok(false) => {}
                Err(e) => errors.push(e),
            },
            Err(e) => errors.push(e),
        }
    }
}

/// Expands a path string that may start with `~` to the user's home directory.
pub(crate) fn expand_tilde(path_str: &str, home: &Path) -> PathBuf {
    if path_str == "~" {
        home.to_path_buf()
    } else if let Some(stripped) = path_str.strip_prefix("~/") {
        home.join(stripped)
    } else {
        PathBuf::from(path_str)
    }
}

/// Expands `raw` and accepts it only below one of the roots an uninstall may
/// touch, never a root itself. Relative paths and `..` components are refused.
fn checked_path(raw: &str, home: &Path) -> std::result::Result<PathBuf, String> {
    let path = expand_tilde(raw, home);
    if !path.is_absolute() {
        return Err(format!("refusing relative path '{raw}'"));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("refusing path with '..': '{raw}'"));
    }
    let allowed_roots = [
        home.join("Library"),
        home.join(".config"),
        home.join("Applications"),
        PathBuf::from("/Applications"),
        PathBuf::from("/Library"),
    ];
    let Some(root) = allowed_roots.iter().find(|root| path.starts_with(root)) else {
        warn!("Removal path rejected (outside allowed areas): {}", path.display());
        return Err(format!("refusing path outside allowed areas: '{}'", path.display()));
    };
    if path == *root {
        warn!("Removal path rejected (too broad): {}", path.display());
        return Err(format!("refusing to remove '{}'", path.display()));
    }
    Ok(path)
}

/// Removes a file, symlink or directory tree. Already-missing paths count as
/// removed. With `use_sudo`, permission errors are retried through `sudo rm -rf`.
pub(crate) fn remove_filesystem_artifact(
    path: &Path,
    use_sudo: bool,
) -> std::result::Result<(), String> {
    let metadata = match path.symlink_metadata() {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Artifact not found (already removed?): {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(format!("reading {}: {}", path.display(), e)),
    };

    let is_real_dir = metadata.file_type().is_dir();
    let removed = if is_real_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match removed {
        Ok(()) => {
            debug!("Removed artifact: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if use_sudo && e.kind() == io::ErrorKind::PermissionDenied => {
            warn!(
                "Direct removal failed (Permission Denied). Trying with sudo rm -rf: {}",
                path.display()
            );
            let (program, args) = privileged(true, "rm", vec!["-rf".into(), path.into()]);
            match run_command(&program, &args) {
                Ok(out) if out.status.success() => Ok(()),
                Ok(out) => Err(format!(
                    "sudo rm {} failed: {}",
                    path.display(),
                    stderr_text(&out)
                )),
                Err(e) => Err(format!("running sudo rm for {}: {}", path.display(), e)),
            }
        }
        Err(e) => Err(format!("removing {}: {}", path.display(), e)),
    }
}

/// Removes `path` only if it is an empty directory. Returns whether it was removed.
fn remove_empty_dir(path: &Path) -> std::result::Result<bool, String> {
    if !path.is_dir() {
        debug!("rmdir target is not a directory: {}", path.display());
        return Ok(false);
    }
    let mut entries =
        fs::read_dir(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
    if entries.next().is_some() {
        debug!("Leaving non-empty directory {}", path.display());
        return Ok(false);
    }
    fs::remove_dir(path)
        .map(|()| true)
        .map_err(|e| format!("removing directory {}: {}", path.display(), e))
}

/// Moves `path` to the trash, removing it directly when trashing fails.
/// Returns whether anything was there to remove.
fn trash_path(path: &Path, use_sudo: bool) -> std::result::Result<bool, String> {
    if path.symlink_metadata().is_err() {
        debug!("Path for trashing not found: {}", path.display());
        return Ok(false);
    }
    match trash::delete(path) {
        Ok(()) => {
            debug!("Trashed: {}", path.display());
            Ok(true)
        }
        Err(e) => {
            warn!(
                "Failed to trash {} ({}), removing it instead",
                path.display(),
                e
            );
            remove_filesystem_artifact(path, use_sudo)
                .map(|()| true)
                .map_err(|removal| format!("trashing {}: {}; {}", path.display(), e, removal))
        }
    }
}
