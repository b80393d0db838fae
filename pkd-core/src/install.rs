// pkd-core/src/install.rs
use std::fs;
use std::path::Path;
use std::sync::Arc;

use pkd_common::config::Config;
use pkd_common::descriptor::validate_version;
use pkd_common::error::{PkdError, Result};
use pkd_common::lifecycle::{InstallState, LifecycleEvent};
use pkd_common::model::{Descriptor, InstalledArtifact};
use pkd_net::FetchedArtifact;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::platform::Platform;
use crate::receipt::{find_receipt, InstallReceipt};
use crate::stage::{detect_container, extract_zip, resolve_target, ContainerKind, MountedImage};
use crate::state::StateTracker;

#[derive(Debug, Clone)]
pub enum InstallOutcome {
    Installed(InstallReceipt),
    /// A receipt already exists; nothing was fetched or changed.
    AlreadyInstalled { version: String },
}

impl Executor {
    /// Fetches, verifies and installs `descriptor`, then writes its receipt.
    ///
    /// Calls for the same identifier are serialized. Once the artifact is
    /// verified, the install and its receipt run to completion on a blocking
    /// task that keeps the identifier locked, even if the returned future is
    /// dropped.
    pub async fn install(&self, descriptor: &Descriptor) -> Result<InstallOutcome> {
        let token = descriptor.token.as_str();
        validate_version(&descriptor.version).map_err(|msg| PkdError::malformed(token, msg))?;
        let guard = self.locks.acquire(token).await;

        if let Some(existing) = find_receipt(&self.config, token)? {
            info!(
                "'{}' is already installed (version {})",
                token, existing.version
            );
            self.state.observe(token, InstallState::Installed);
            return Ok(InstallOutcome::AlreadyInstalled {
                version: existing.version,
            });
        }

        match self.state.current(token) {
            InstallState::Uninstalled => {}
            InstallState::Failed => self.state.transition(token, InstallState::Uninstalled)?,
            stale => {
                debug!("Resetting stale state '{}' for '{}'", stale, token);
                self.state.observe(token, InstallState::Uninstalled);
            }
        }

        self.state.transition(token, InstallState::Downloading)?;
        self.state.emit(LifecycleEvent::DownloadStarted {
            token: token.to_string(),
            url: descriptor.source_url().to_string(),
        });
        let (stage, fetched) = match self.fetch(descriptor).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(mark_failed(&self.state, token, e)),
        };
        self.state.emit(LifecycleEvent::DownloadFinished {
            token: token.to_string(),
            path: fetched.path.clone(),
            size_bytes: fetched.size_bytes,
            verification: fetched.verification,
        });
        self.state.transition(token, InstallState::Verified)?;

        let config = self.config.clone();
        let platform = Arc::clone(&self.platform);
        let state = Arc::clone(&self.state);
        let owned = descriptor.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let token = owned.token.as_str();
            let result =
                install_artifact(&config, platform.as_ref(), &owned, &fetched, stage.path(), &state)
                    .and_then(|artifacts| {
                        let receipt = InstallReceipt::new(
                            &owned,
                            fetched.verification,
                            fetched.sha256.clone(),
                            artifacts,
                        )?;
                        receipt.write(&config)?;
                        Ok(receipt)
                    });
            drop(stage);
            match result {
                Ok(receipt) => {
                    state.transition(token, InstallState::Installed)?;
                    info!("Installed '{}' {}", token, owned.version);
                    Ok(receipt)
                }
                Err(e) => {
                    remove_version_dir(&config, &owned);
                    Err(mark_failed(&state, token, e))
                }
            }
        });

        match handle.await {
            Ok(result) => result.map(InstallOutcome::Installed),
            Err(e) => Err(mark_failed(
                &self.state,
                token,
                PkdError::InstallError(format!("Install task for '{token}' did not complete: {e}")),
            )),
        }
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<(TempDir, FetchedArtifact)> {
        let tmp_root = self.config.tmp_dir();
        fs::create_dir_all(&tmp_root)?;
        let stage = tempfile::Builder::new()
            .prefix(&format!("{}-", descriptor.token))
            .tempdir_in(&tmp_root)
            .map_err(|e| {
                PkdError::IoError(format!(
                    "Failed to create staging directory in {}: {}",
                    tmp_root.display(),
                    e
                ))
            })?;
        debug!("Created staging directory: {}", stage.path().display());
        let fetched =
            pkd_net::fetch_artifact(&self.client, descriptor, stage.path(), &self.config).await?;
        Ok((stage, fetched))
    }
}

/// Marks `token` failed, publishes the error and hands it back.
fn mark_failed(state: &StateTracker, token: &str, err: PkdError) -> PkdError {
    error!("Install of '{}' failed: {}", token, err);
    if let Err(e) = state.transition(token, InstallState::Failed) {
        warn!("{}", e);
    }
    state.emit(LifecycleEvent::failed(token, &err));
    err
}

fn install_artifact(
    config: &Config,
    platform: &dyn Platform,
    descriptor: &Descriptor,
    fetched: &FetchedArtifact,
    stage_dir: &Path,
    state: &StateTracker,
) -> Result<Vec<InstalledArtifact>> {
    let version_dir = config.cask_version_path(&descriptor.token, &descriptor.version);
    fs::create_dir_all(&version_dir)?;
    debug!("Created Caskroom version directory: {}", version_dir.display());

    let mut artifacts = match detect_container(&fetched.path)? {
        ContainerKind::Dmg => {
            let mounted = MountedImage::attach(platform, &fetched.path)?;
            install_targets(platform, descriptor, mounted.path(), None, &version_dir, state)?
        }
        ContainerKind::Zip => {
            let extracted = stage_dir.join("extracted");
            extract_zip(&fetched.path, &extracted)?;
            install_targets(platform, descriptor, &extracted, None, &version_dir, state)?
        }
        ContainerKind::Pkg => {
            let root = fetched.path.parent().unwrap_or(stage_dir);
            install_targets(
                platform,
                descriptor,
                root,
                Some(&fetched.path),
                &version_dir,
                state,
            )?
        }
    };

    for id in &descriptor.uninstall.pkgutil {
        let receipt = InstalledArtifact::PkgUtilReceipt { id: id.clone() };
        if !artifacts.contains(&receipt) {
            debug!("Recording pkgutil ID: {}", id);
            artifacts.push(receipt);
        }
    }
    Ok(artifacts)
}

/// Installs every `pkg` target found under `root`. `bare_pkg` is the fetched
/// file itself when the download was a package rather than a container.
fn install_targets(
    platform: &dyn Platform,
    descriptor: &Descriptor,
    root: &Path,
    bare_pkg: Option<&Path>,
    version_dir: &Path,
    state: &StateTracker,
) -> Result<Vec<InstalledArtifact>> {
    let token = descriptor.token.as_str();
    let mut artifacts = Vec::new();

    for target in &descriptor.pkgs {
        let pkg_path = match (resolve_target(root, &target.path), bare_pkg) {
            (Ok(path), _) => path,
            (Err(_), Some(bare)) if descriptor.pkgs.len() == 1 => {
                debug!(
                    "Using downloaded package {} for target '{}'",
                    bare.display(),
                    target.path
                );
                bare.to_path_buf()
            }
            (Err(e), _) => {
                return Err(PkdError::InstallerInvocationError {
                    token: token.to_string(),
                    status: None,
                    detail: e.to_string(),
                })
            }
        };

        let file_name = pkg_path.file_name().ok_or_else(|| {
            PkdError::InstallError(format!("Invalid pkg path: {}", pkg_path.display()))
        })?;
        let reference = version_dir.join(file_name);
        debug!(
            "Copying pkg to Caskroom for reference: {}",
            reference.display()
        );
        fs::copy(&pkg_path, &reference).map_err(|e| {
            PkdError::IoError(format!(
                "Failed to copy {} to {}: {}",
                pkg_path.display(),
                reference.display(),
                e
            ))
        })?;
        artifacts.push(InstalledArtifact::CaskroomReference { path: reference });

        state.emit(LifecycleEvent::InstallerStarted {
            token: token.to_string(),
            pkg: target.path.clone(),
        });
        info!("Running installer for {}", pkg_path.display());
        platform.install_pkg(token, &pkg_path, target)?;
    }
    Ok(artifacts)
}

fn remove_version_dir(config: &Config, descriptor: &Descriptor) {
    let token_dir = config.cask_token_path(&descriptor.token);
    let version_dir = config.cask_version_path(&descriptor.token, &descriptor.version);
    if version_dir.parent() != Some(token_dir.as_path()) {
        warn!(
            "Not cleaning up {}: it is not inside {}",
            version_dir.display(),
            token_dir.display()
        );
        return;
    }
    if version_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&version_dir) {
            warn!(
                "Failed to clean up {} after failed install: {}",
                version_dir.display(),
                e
            );
        }
    }
    // Only succeeds when no other version is left.
    let _ = fs::remove_dir(&token_dir);
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use httpmock::prelude::*;
    use pkd_common::descriptor::DescriptorBuilder;
    use pkd_common::error::ErrorKind;
    use pkd_common::lifecycle::Verification;
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::testing::{test_config, FakePlatform};

    const BODY: &[u8] = b"disk image bytes";

    fn descriptor(url: &str, sha256: Option<String>) -> Descriptor {
        let builder = DescriptorBuilder::new("font-demo")
            .version("1.0")
            .url(url)
            .name("Demo")
            .pkg("Demo.pkg")
            .uninstall_pkgutil("com.example.demo");
        match sha256 {
            Some(hex) => builder.sha256(hex),
            None => builder.no_check(),
        }
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_installs_of_one_identifier_install_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::with_pkg(root.path(), "Demo.pkg"));
        let executor = Executor::new(test_config(root.path()), platform.clone()).unwrap();
        let d = descriptor(&server.url("/Demo.dmg"), None);

        let (first, second) = tokio::join!(executor.install(&d), executor.install(&d));
        let outcomes = [first.unwrap(), second.unwrap()];

        let installed: Vec<&InstallReceipt> = outcomes
            .iter()
            .filter_map(|o| match o {
                InstallOutcome::Installed(receipt) => Some(receipt),
                InstallOutcome::AlreadyInstalled { .. } => None,
            })
            .collect();
        assert_eq!(installed.len(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, InstallOutcome::AlreadyInstalled { version } if version == "1.0")));
        mock.assert_calls(1);

        assert_eq!(platform.installs().len(), 1);
        assert_eq!(platform.detach_count(), 1);
        assert_eq!(executor.state_of("font-demo"), InstallState::Installed);

        let receipt = installed[0];
        assert_eq!(receipt.verification, Verification::Unverified);
        let reference = executor
            .config()
            .cask_version_path("font-demo", "1.0")
            .join("Demo.pkg");
        assert!(receipt
            .artifacts
            .contains(&InstalledArtifact::CaskroomReference { path: reference.clone() }));
        assert!(receipt.artifacts.contains(&InstalledArtifact::PkgUtilReceipt {
            id: "com.example.demo".to_string()
        }));
        assert!(reference.is_file());
        assert!(fs::read_dir(executor.config().tmp_dir()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn dropped_install_still_finishes_and_keeps_the_lock() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(
            FakePlatform::with_pkg(root.path(), "Demo.pkg")
                .slow_installer(Duration::from_millis(500)),
        );
        let executor = Executor::new(test_config(root.path()), platform.clone()).unwrap();
        let d = descriptor(&server.url("/Demo.dmg"), None);
        let mut events = executor.subscribe();

        {
            let first = executor.install(&d);
            tokio::pin!(first);
            loop {
                tokio::select! {
                    _ = &mut first => panic!("install finished before the installer started"),
                    event = events.recv() => {
                        if let LifecycleEvent::InstallerStarted { .. } = event.unwrap() {
                            break;
                        }
                    }
                }
            }
        }

        let second = executor.install(&d).await.unwrap();
        assert!(matches!(second, InstallOutcome::AlreadyInstalled { ref version } if version == "1.0"));
        mock.assert_calls(1);
        assert_eq!(platform.installs().len(), 1);
        assert_eq!(platform.max_concurrent_installs(), 1);
        assert!(find_receipt(executor.config(), "font-demo").unwrap().is_some());
        assert_eq!(executor.state_of("font-demo"), InstallState::Installed);
    }

    #[tokio::test]
    async fn version_escaping_the_caskroom_is_refused_before_any_side_effect() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let sentinel = root.path().join("keep.txt");
        fs::write(&sentinel, b"keep").unwrap();
        let platform =
            Arc::new(FakePlatform::with_pkg(root.path(), "Demo.pkg").failing_installer(1));
        let executor = Executor::new(test_config(root.path()), platform.clone()).unwrap();

        for version in ["../..", "1.0/beta"] {
            let mut d = descriptor(&server.url("/Demo.dmg"), None);
            d.version = version.to_string();
            let err = executor.install(&d).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedDescriptor, "{version}");
        }
        mock.assert_calls(0);
        assert!(sentinel.exists());
        assert!(platform.installs().is_empty());
    }

    #[test]
    fn failed_install_cleanup_stays_inside_the_token_dir() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sentinel = root.path().join("keep.txt");
        fs::write(&sentinel, b"keep").unwrap();
        let mut d = descriptor("https://example.com/Demo.dmg", None);

        d.version = "../..".to_string();
        remove_version_dir(&config, &d);
        assert!(sentinel.exists());

        d.version = "1.0".to_string();
        let version_dir = config.cask_version_path("font-demo", "1.0");
        fs::create_dir_all(&version_dir).unwrap();
        remove_version_dir(&config, &d);
        assert!(!config.cask_token_path("font-demo").exists());
        assert!(sentinel.exists());
    }

    #[tokio::test]
    async fn checksum_mismatch_installs_nothing_and_retry_succeeds() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::with_pkg(root.path(), "Demo.pkg"));
        let executor = Executor::new(test_config(root.path()), platform.clone()).unwrap();

        let wrong = descriptor(&server.url("/Demo.dmg"), Some("0".repeat(64)));
        let err = executor.install(&wrong).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(platform.installs().is_empty());
        assert!(find_receipt(executor.config(), "font-demo").unwrap().is_none());
        assert_eq!(executor.state_of("font-demo"), InstallState::Failed);

        let right = descriptor(
            &server.url("/Demo.dmg"),
            Some(hex::encode(Sha256::digest(BODY))),
        );
        let outcome = executor.install(&right).await.unwrap();
        let InstallOutcome::Installed(receipt) = outcome else {
            panic!("expected a fresh install");
        };
        assert_eq!(receipt.verification, Verification::Verified);
        assert_eq!(executor.state_of("font-demo"), InstallState::Installed);
    }

    #[tokio::test]
    async fn installer_failure_leaves_no_receipt() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::with_pkg(root.path(), "Demo.pkg").failing_installer(1));
        let executor = Executor::new(test_config(root.path()), platform.clone()).unwrap();
        let mut events = executor.subscribe();
        let d = descriptor(&server.url("/Demo.dmg"), None);

        let err = executor.install(&d).await.unwrap_err();
        match &err {
            PkdError::InstallerInvocationError { token, status, .. } => {
                assert_eq!(token, "font-demo");
                assert_eq!(*status, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(find_receipt(executor.config(), "font-demo").unwrap().is_none());
        assert!(!executor.config().cask_token_path("font-demo").exists());
        assert_eq!(platform.detach_count(), 1);

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::Transition { to, .. } = event {
                transitions.push(to);
            }
        }
        assert_eq!(
            transitions,
            vec![
                InstallState::Downloading,
                InstallState::Verified,
                InstallState::Failed
            ]
        );
    }

    #[tokio::test]
    async fn missing_artifact_is_reported_with_identifier() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(404);
        });
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::with_pkg(root.path(), "Demo.pkg"));
        let executor = Executor::new(test_config(root.path()), platform).unwrap();

        let err = executor
            .install(&descriptor(&server.url("/Demo.dmg"), None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArtifactNotFound);
        assert_eq!(err.identifier(), Some("font-demo"));
    }

    #[tokio::test]
    async fn zip_artifacts_are_extracted_before_install() {
        let mut archive = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
            writer
                .start_file("Demo.pkg", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"pkg payload").unwrap();
            writer.finish().unwrap();
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/Demo.zip");
            then.status(200).body(archive.clone());
        });
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::with_pkg(root.path(), "Other.pkg"));
        let executor = Executor::new(test_config(root.path()), platform.clone()).unwrap();

        executor
            .install(&descriptor(&server.url("/Demo.zip"), None))
            .await
            .unwrap();
        let installs = platform.installs();
        assert_eq!(installs.len(), 1);
        assert!(installs[0].ends_with("extracted/Demo.pkg"));
        assert_eq!(platform.detach_count(), 0);
    }

    #[tokio::test]
    async fn pkg_missing_from_image_is_an_installer_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(FakePlatform::with_pkg(root.path(), "Something Else.pkg"));
        let executor = Executor::new(test_config(root.path()), platform.clone()).unwrap();

        let err = executor
            .install(&descriptor(&server.url("/Demo.dmg"), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PkdError::InstallerInvocationError { status: None, .. }
        ));
        assert!(platform.installs().is_empty());
    }
}
