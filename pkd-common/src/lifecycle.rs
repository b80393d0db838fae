// pkd-common/src/lifecycle.rs
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PkdError;

/// Per-identifier install state.
///
/// ```text
/// Uninstalled -> Downloading -> Verified -> Installed -> Uninstalled
///                     |             |
///                     +--> Failed <-+      (Failed -> Uninstalled to retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Uninstalled,
    Downloading,
    Verified,
    Installed,
    Failed,
}

impl InstallState {
    pub fn can_transition_to(self, next: InstallState) -> bool {
        use InstallState::*;
        matches!(
            (self, next),
            (Uninstalled, Downloading)
                | (Downloading, Verified)
                | (Downloading, Failed)
                | (Verified, Installed)
                | (Verified, Failed)
                | (Installed, Uninstalled)
                | (Failed, Uninstalled)
        )
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallState::Uninstalled => "uninstalled",
            InstallState::Downloading => "downloading",
            InstallState::Verified => "verified",
            InstallState::Installed => "installed",
            InstallState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of the fetch stage. `Unverified` means the checksum was skipped
/// with `sha256 :no_check`; it is kept in the receipt for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Verified,
    Unverified,
}

impl Verification {
    pub fn is_verified(self) -> bool {
        matches!(self, Verification::Verified)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Transition {
        token: String,
        from: InstallState,
        to: InstallState,
    },
    DownloadStarted {
        token: String,
        url: String,
    },
    DownloadFinished {
        token: String,
        path: PathBuf,
        size_bytes: u64,
        verification: Verification,
    },
    InstallerStarted {
        token: String,
        pkg: String,
    },
    Failed {
        token: String,
        error: String,
    },
    UninstallStarted {
        token: String,
        version: String,
    },
    UninstallFinished {
        token: String,
        version: String,
    },
}

impl LifecycleEvent {
    pub fn failed(token: impl Into<String>, error: &PkdError) -> Self {
        LifecycleEvent::Failed {
            token: token.into(),
            error: error.to_string(),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            LifecycleEvent::Transition { token, .. }
            | LifecycleEvent::DownloadStarted { token, .. }
            | LifecycleEvent::DownloadFinished { token, .. }
            | LifecycleEvent::InstallerStarted { token, .. }
            | LifecycleEvent::Failed { token, .. }
            | LifecycleEvent::UninstallStarted { token, .. }
            | LifecycleEvent::UninstallFinished { token, .. } => token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_cycle_is_allowed() {
        use InstallState::*;
        let cycle = [Uninstalled, Downloading, Verified, Installed, Uninstalled];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Downloading.can_transition_to(Failed));
        assert!(Verified.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Uninstalled));
    }

    #[test]
    fn shortcuts_are_rejected() {
        use InstallState::*;
        assert!(!Uninstalled.can_transition_to(Installed));
        assert!(!Downloading.can_transition_to(Installed));
        assert!(!Installed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Installed));
    }

    #[test]
    fn verification_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Verification::Unverified).unwrap(),
            "\"unverified\""
        );
    }
}
