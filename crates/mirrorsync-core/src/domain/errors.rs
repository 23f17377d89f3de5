//! Domain error types
//!
//! [`DomainError`] covers validation of identities and paths.
//! [`SyncError`] is the typed error every sync operation reports, and its
//! [`ErrorSeverity`] decides how the orchestrator reacts to it.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// File name cannot serve as a file identity
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// Invalid hash format (expected hex-encoded SHA-256)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

// ============================================================================
// SyncError
// ============================================================================

/// How the orchestrator must react to a [`SyncError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Logged and surfaced to observers; synchronization continues
    Transient,
    /// Synchronization stops and must be restarted explicitly
    EnvironmentFatal,
    /// A single action failed on local storage; reported, engine keeps going
    LocalIo,
    /// No defined recovery; logged only
    Unclassified,
}

/// Errors reported by monitors, the executor and the orchestrator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A cloud item is temporarily unavailable
    #[error("File is temporarily unavailable: {0}")]
    FileUnavailable(String),

    /// The provider refused an upload because the account is over quota
    #[error("File was not uploaded due to quota: {0}")]
    QuotaExceeded(String),

    /// The cloud service could not be reached
    #[error("Cloud service is not reachable")]
    CloudServiceUnreachable,

    /// Cloud storage is disabled or not signed in
    #[error("Cloud storage is not available")]
    CloudUnavailable,

    /// The cloud container directory does not exist
    #[error("Cloud container not found: {0}")]
    ContainerNotFound(PathBuf),

    /// The local directory could not be opened for watching
    #[error("Failed to open local directory: {0}")]
    LocalDirectoryUnavailable(PathBuf),

    /// The local directory could not be listed
    #[error("Failed to retrieve local directory content: {0}")]
    LocalDirectoryUnreadable(String),

    /// Local I/O failed while executing an action
    #[error("I/O error at {path}: {message}")]
    Io {
        path: PathBuf,
        kind: std::io::ErrorKind,
        message: String,
    },

    /// The bookmarks engine did not confirm a reload in time
    #[error("Bookmarks reload was not confirmed within {0} seconds")]
    ReloadTimedOut(u64),

    /// Anything the taxonomy does not classify
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Wraps an I/O error together with the path it happened on
    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        SyncError::Io {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Classifies the error into the recovery taxonomy
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SyncError::FileUnavailable(_)
            | SyncError::QuotaExceeded(_)
            | SyncError::CloudServiceUnreachable
            | SyncError::ReloadTimedOut(_) => ErrorSeverity::Transient,
            SyncError::CloudUnavailable
            | SyncError::ContainerNotFound(_)
            | SyncError::LocalDirectoryUnavailable(_)
            | SyncError::LocalDirectoryUnreadable(_) => ErrorSeverity::EnvironmentFatal,
            SyncError::Io { .. } => ErrorSeverity::LocalIo,
            SyncError::Other(_) => ErrorSeverity::Unclassified,
        }
    }

    /// Returns true if synchronization must stop on this error
    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::EnvironmentFatal
    }

    /// Returns true if the I/O error means the target does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::Io {
                kind: std::io::ErrorKind::NotFound,
                ..
            }
        )
    }
}
