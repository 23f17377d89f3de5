//! Error types for the conflict engine

use std::path::PathBuf;

use mirrorsync_core::domain::SyncError;
use thiserror::Error;

/// Errors that can occur while resolving conflicts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Every candidate name up to the attempt cap was already taken
    #[error("no free name found for {path} after {attempts} attempts")]
    NamesExhausted { path: PathBuf, attempts: usize },

    /// The path has no usable file name to derive a new one from
    #[error("cannot derive a new name from {0}")]
    InvalidFileName(PathBuf),
}

impl From<ConflictError> for SyncError {
    fn from(err: ConflictError) -> Self {
        SyncError::Other(err.to_string())
    }
}
