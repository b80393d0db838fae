// pkd-common/src/error.rs
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Identifier used in parse errors raised before the `cask` header was read.
pub const UNKNOWN_TOKEN: &str = "unknown";

#[derive(Error, Debug, Clone)]
pub enum PkdError {
    #[error("Malformed descriptor '{token}': {message}")]
    MalformedDescriptor { token: String, message: String },

    #[error("Unsupported directive '{directive}' in '{token}' at line {line}")]
    UnsupportedDirective {
        token: String,
        line: usize,
        directive: String,
    },

    #[error(
        "Duplicate field '{field}' in '{token}' at line {line} (first defined at line {first_line})"
    )]
    DuplicateField {
        token: String,
        field: String,
        line: usize,
        first_line: usize,
    },

    #[error("Network error fetching '{token}' from {url}: {detail}")]
    NetworkError {
        token: String,
        url: String,
        detail: String,
    },

    #[error("Checksum mismatch for '{token}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        token: String,
        expected: String,
        actual: String,
    },

    #[error("Artifact for '{token}' not found at {url}")]
    ArtifactNotFound { token: String, url: String },

    #[error("Installer failed for '{token}' ({}): {detail}", ExitStatusDisplay(.status))]
    InstallerInvocationError {
        token: String,
        status: Option<i32>,
        detail: String,
    },

    #[error("No uninstall record for '{0}': it is not installed")]
    UninstallRecordMissing(String),

    #[error("'{0}' is not in the catalog")]
    NotInCatalog(String),

    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("IoError: {0}")]
    IoError(String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Installation Error: {0}")]
    InstallError(String),

    #[error("Uninstall Error for '{0}': {1}")]
    UninstallError(String, String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

/// Coarse classification of [`PkdError`], one entry per reportable failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedDescriptor,
    UnsupportedDirective,
    DuplicateField,
    NetworkError,
    ChecksumMismatch,
    ArtifactNotFound,
    InstallerInvocationError,
    UninstallRecordMissing,
    Other,
}

impl ErrorKind {
    /// Process exit code reported by the CLI for this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::MalformedDescriptor => 10,
            ErrorKind::UnsupportedDirective => 11,
            ErrorKind::DuplicateField => 12,
            ErrorKind::NetworkError => 20,
            ErrorKind::ChecksumMismatch => 21,
            ErrorKind::ArtifactNotFound => 22,
            ErrorKind::InstallerInvocationError => 30,
            ErrorKind::UninstallRecordMissing => 31,
            ErrorKind::Other => 1,
        }
    }
}

impl PkdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PkdError::MalformedDescriptor { .. } => ErrorKind::MalformedDescriptor,
            PkdError::UnsupportedDirective { .. } => ErrorKind::UnsupportedDirective,
            PkdError::DuplicateField { .. } => ErrorKind::DuplicateField,
            PkdError::NetworkError { .. } => ErrorKind::NetworkError,
            PkdError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            PkdError::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            PkdError::InstallerInvocationError { .. } => ErrorKind::InstallerInvocationError,
            PkdError::UninstallRecordMissing(_) => ErrorKind::UninstallRecordMissing,
            _ => ErrorKind::Other,
        }
    }

    /// The package identifier the error is about, when the error carries one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            PkdError::MalformedDescriptor { token, .. }
            | PkdError::UnsupportedDirective { token, .. }
            | PkdError::DuplicateField { token, .. }
            | PkdError::NetworkError { token, .. }
            | PkdError::ChecksumMismatch { token, .. }
            | PkdError::ArtifactNotFound { token, .. }
            | PkdError::InstallerInvocationError { token, .. } => Some(token.as_str()),
            PkdError::UninstallRecordMissing(token)
            | PkdError::NotInCatalog(token)
            | PkdError::UninstallError(token, _) => Some(token.as_str()),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    pub fn malformed(token: &str, message: impl Into<String>) -> Self {
        PkdError::MalformedDescriptor {
            token: token.to_string(),
            message: message.into(),
        }
    }
}

struct ExitStatusDisplay<'a>(&'a Option<i32>);

impl fmt::Display for ExitStatusDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.0 {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("no exit code"),
        }
    }
}

impl From<std::io::Error> for PkdError {
    fn from(err: std::io::Error) -> Self {
        PkdError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for PkdError {
    fn from(err: reqwest::Error) -> Self {
        PkdError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for PkdError {
    fn from(err: serde_json::Error) -> Self {
        PkdError::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PkdError>;
