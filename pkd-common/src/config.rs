// pkd-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::UserDirs;
use tracing::debug;

use super::error::{PkdError, Result};

const DEFAULT_ROOT_DIR_NAME: &str = ".pkd";
const DEFAULT_INSTALL_TARGET: &str = "/";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const RECEIPT_FILENAME: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub catalog_dir: PathBuf,
    /// Accept plain `http` artifact URLs. Off unless `PKD_ALLOW_HTTP=1`.
    pub allow_http: bool,
    /// Volume handed to the platform installer as `-target`.
    pub install_target: String,
    pub use_sudo: bool,
    pub download_timeout: Duration,
    pub connect_timeout: Duration,
    /// Expansion of `~` in removal paths.
    pub home: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading pkd configuration");

        let root = match env::var("PKD_ROOT").ok().filter(|s| !s.is_empty()) {
            Some(root) => PathBuf::from(root),
            None => {
                let home = UserDirs::new()
                    .map(|ud| ud.home_dir().to_path_buf())
                    .ok_or_else(|| {
                        PkdError::Config(
                            "PKD_ROOT is not set and the home directory is unknown".to_string(),
                        )
                    })?;
                debug!(
                    "PKD_ROOT not set, falling back to {}/{}",
                    home.display(),
                    DEFAULT_ROOT_DIR_NAME
                );
                home.join(DEFAULT_ROOT_DIR_NAME)
            }
        };

        let mut config = Self::for_root(root);

        if let Some(catalog) = env::var("PKD_CATALOG").ok().filter(|s| !s.is_empty()) {
            config.catalog_dir = PathBuf::from(catalog);
        }
        config.allow_http = env_flag("PKD_ALLOW_HTTP")?.unwrap_or(false);
        config.use_sudo = env_flag("PKD_USE_SUDO")?.unwrap_or(true);
        if let Some(target) = env::var("PKD_INSTALL_TARGET").ok().filter(|s| !s.is_empty()) {
            config.install_target = target;
        }
        if let Some(secs) = env_secs("PKD_DOWNLOAD_TIMEOUT_SECS")? {
            config.download_timeout = secs;
        }
        if let Some(secs) = env_secs("PKD_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = secs;
        }

        debug!("Effective PKD_ROOT: {}", config.root.display());
        debug!("Catalog directory: {}", config.catalog_dir.display());
        Ok(config)
    }

    /// Configuration rooted at `root` with every other setting at its default.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            catalog_dir: root.join("Casks"),
            root,
            allow_http: false,
            install_target: DEFAULT_INSTALL_TARGET.to_string(),
            use_sudo: true,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            home: UserDirs::new()
                .map_or_else(|| PathBuf::from("/"), |ud| ud.home_dir().to_path_buf()),
        }
    }

    pub fn caskroom_dir(&self) -> PathBuf {
        self.root.join("Caskroom")
    }

    pub fn cask_token_path(&self, token: &str) -> PathBuf {
        self.caskroom_dir().join(token)
    }

    pub fn cask_version_path(&self, token: &str, version: &str) -> PathBuf {
        self.cask_token_path(token).join(version)
    }

    pub fn receipt_path(&self, token: &str, version: &str) -> PathBuf {
        self.cask_version_path(token, version).join(RECEIPT_FILENAME)
    }

    pub fn receipt_filename(&self) -> &'static str {
        RECEIPT_FILENAME
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn home_dir(&self) -> &Path {
        &self.home
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(v) => match v.trim() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" | "" => Ok(Some(false)),
            other => Err(PkdError::Config(format!(
                "{name} must be 0 or 1, got '{other}'"
            ))),
        },
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| PkdError::Config(format!("{name} must be a number of seconds: {e}"))),
        Err(_) => Ok(None),
    }
}
