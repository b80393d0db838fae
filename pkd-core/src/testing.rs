// pkd-core/src/testing.rs
//! In-memory platform for executor tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use pkd_common::config::Config;
use pkd_common::error::{PkdError, Result};
use pkd_common::model::PkgTarget;

use crate::platform::Platform;

pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::for_root(root);
    config.allow_http = true;
    config.use_sudo = false;
    config.home = root.to_path_buf();
    config
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    image_dir: PathBuf,
    installer_exit: Option<i32>,
    installer_delay: Option<Duration>,
    running: Mutex<usize>,
    max_running: Mutex<usize>,
    installs: Mutex<Vec<PathBuf>>,
    forgotten: Mutex<Vec<String>>,
    receipts: Mutex<HashMap<String, Vec<PathBuf>>>,
    detached: Mutex<usize>,
}

impl FakePlatform {
    /// A platform whose disk images contain a single package `pkg_name`.
    pub(crate) fn with_pkg(root: &Path, pkg_name: &str) -> Self {
        let image_dir = root.join("image");
        fs::create_dir_all(&image_dir).unwrap();
        fs::write(image_dir.join(pkg_name), b"pkg payload").unwrap();
        Self {
            image_dir,
            ..Default::default()
        }
    }

    pub(crate) fn failing_installer(mut self, code: i32) -> Self {
        self.installer_exit = Some(code);
        self
    }

    /// Makes every `install_pkg` call block for `delay`.
    pub(crate) fn slow_installer(mut self, delay: Duration) -> Self {
        self.installer_delay = Some(delay);
        self
    }

    /// Largest number of `install_pkg` calls that ran at the same time.
    pub(crate) fn max_concurrent_installs(&self) -> usize {
        *self.max_running.lock().unwrap()
    }

    /// Registers the files the receipt database reports for `id`.
    pub(crate) fn register_receipt(&self, id: &str, files: Vec<PathBuf>) {
        self.receipts.lock().unwrap().insert(id.to_string(), files);
    }

    pub(crate) fn installs(&self) -> Vec<PathBuf> {
        self.installs.lock().unwrap().clone()
    }

    pub(crate) fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().unwrap().clone()
    }

    pub(crate) fn detach_count(&self) -> usize {
        *self.detached.lock().unwrap()
    }
}

impl Platform for FakePlatform {
    fn attach_image(&self, _image: &Path) -> Result<PathBuf> {
        Ok(self.image_dir.clone())
    }

    fn detach_image(&self, _mount_point: &Path) -> Result<()> {
        *self.detached.lock().unwrap() += 1;
        Ok(())
    }

    fn install_pkg(&self, token: &str, pkg: &Path, _target: &PkgTarget) -> Result<()> {
        if let Some(code) = self.installer_exit {
            return Err(PkdError::InstallerInvocationError {
                token: token.to_string(),
                status: Some(code),
                detail: "installer: simulated failure".to_string(),
            });
        }
        {
            let mut running = self.running.lock().unwrap();
            *running += 1;
            let mut max = self.max_running.lock().unwrap();
            *max = (*max).max(*running);
        }
        if let Some(delay) = self.installer_delay {
            thread::sleep(delay);
        }
        self.installs.lock().unwrap().push(pkg.to_path_buf());
        *self.running.lock().unwrap() -= 1;
        Ok(())
    }

    fn pkg_files(&self, id: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn forget_pkg(&self, id: &str) -> Result<()> {
        self.receipts.lock().unwrap().remove(id);
        self.forgotten.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
