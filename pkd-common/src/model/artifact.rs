// pkd-common/src/model/artifact.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Something an install created or registered, recorded in the install receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstalledArtifact {
    /// A macOS package receipt ID managed by pkgutil.
    PkgUtilReceipt { id: String },
    /// A file copied *into* the Caskroom (e.g., the installed .pkg).
    CaskroomReference { path: PathBuf },
}
