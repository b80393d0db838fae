// pkd-core/src/receipt.rs
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use pkd_common::config::Config;
use pkd_common::error::{PkdError, Result};
use pkd_common::lifecycle::Verification;
use pkd_common::model::{Descriptor, InstalledArtifact, RemovalSpec};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const RECEIPT_FORMAT_VERSION: &str = "1";

/// The uninstall record written after a successful install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallReceipt {
    pub receipt_format_version: String,
    pub token: String,
    pub version: String,
    pub installed_at: u64,
    pub verification: Verification,
    pub artifact_sha256: String,
    pub artifacts: Vec<InstalledArtifact>,
    pub uninstall: RemovalSpec,
    #[serde(default)]
    pub zap: Option<RemovalSpec>,
}

impl InstallReceipt {
    pub fn new(
        descriptor: &Descriptor,
        verification: Verification,
        artifact_sha256: String,
        artifacts: Vec<InstalledArtifact>,
    ) -> Result<Self> {
        let installed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PkdError::Generic(format!("System time error: {e}")))?
            .as_secs();
        Ok(Self {
            receipt_format_version: RECEIPT_FORMAT_VERSION.to_string(),
            token: descriptor.token.clone(),
            version: descriptor.version.clone(),
            installed_at,
            verification,
            artifact_sha256,
            artifacts,
            uninstall: descriptor.uninstall.clone(),
            zap: descriptor.zap.clone(),
        })
    }

    /// Writes the receipt into its version directory. The file appears
    /// atomically: readers see either no receipt or a complete one.
    pub fn write(&self, config: &Config) -> Result<PathBuf> {
        let path = config.receipt_path(&self.token, &self.version);
        let dir = config.cask_version_path(&self.token, &self.version);
        fs::create_dir_all(&dir)?;
        debug!("Writing install receipt: {}", path.display());

        let temp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        temp.persist(&path)
            .map_err(|e| PkdError::Io(std::sync::Arc::new(e.error)))?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The Caskroom directory holding this receipt's version directory.
    pub fn token_dir(&self, config: &Config) -> PathBuf {
        config.cask_token_path(&self.token)
    }
}

/// The most recent receipt recorded for `token`, if any.
pub fn find_receipt(config: &Config, token: &str) -> Result<Option<InstallReceipt>> {
    let token_dir = config.cask_token_path(token);
    if !token_dir.is_dir() {
        return Ok(None);
    }
    let receipts = receipts_under(&token_dir, 2, config.receipt_filename());
    Ok(receipts.into_iter().max_by_key(|r| r.installed_at))
}

/// Every receipt in the Caskroom, ordered by identifier.
pub fn installed_receipts(config: &Config) -> Result<Vec<InstallReceipt>> {
    let caskroom = config.caskroom_dir();
    if !caskroom.is_dir() {
        return Ok(Vec::new());
    }
    let mut receipts = receipts_under(&caskroom, 3, config.receipt_filename());
    receipts.sort_by(|a, b| a.token.cmp(&b.token).then(a.installed_at.cmp(&b.installed_at)));
    Ok(receipts)
}

fn receipts_under(dir: &Path, max_depth: usize, filename: &str) -> Vec<InstallReceipt> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == filename)
        .filter_map(|entry| match InstallReceipt::read(entry.path()) {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                warn!("Ignoring unreadable receipt {}: {}", entry.path().display(), e);
                None
            }
        })
        .collect()
}
