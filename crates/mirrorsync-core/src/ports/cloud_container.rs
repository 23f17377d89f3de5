//! Cloud container port (driven/secondary port)
//!
//! The cloud container is the provider-backed directory the local
//! directory is mirrored into. Besides plain file access it offers the
//! provider-specific operations the executor needs: resolving the root,
//! requesting downloads, trashing, and managing conflicting versions.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CloudItem, SyncError};

/// One of several conflicting versions the provider keeps for an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    /// Where the version's bytes can be read
    pub path: PathBuf,
    /// When this version was last modified
    pub last_modified: DateTime<Utc>,
}

/// Provider-backed mirror directory
#[async_trait]
pub trait ICloudContainer: Send + Sync {
    /// Resolves the container's root directory
    ///
    /// Must be called before any write to the container; it fails while
    /// the provider is unavailable.
    ///
    /// # Errors
    /// Returns `SyncError::CloudUnavailable` or `SyncError::ContainerNotFound`
    async fn resolve_root(&self) -> Result<PathBuf, SyncError>;

    /// Asks the provider to materialize a placeholder item
    ///
    /// Success means the download was initiated; completion is observed
    /// later as a cloud update.
    async fn start_downloading(&self, item: &CloudItem) -> Result<(), SyncError>;

    /// Lists the unresolved conflicting versions of `item`
    ///
    /// The current on-disk version is not part of the result.
    async fn conflict_versions(&self, item: &CloudItem) -> Result<Vec<FileVersion>, SyncError>;

    /// Replaces the current content of `item` with `version`
    async fn replace_with_version(
        &self,
        item: &CloudItem,
        version: &FileVersion,
    ) -> Result<(), SyncError>;

    /// Discards every conflicting version of `item`, marking it resolved
    async fn remove_other_versions(&self, item: &CloudItem) -> Result<(), SyncError>;

    /// Directory that receives trashed items for the container at `root`
    fn trash_dir(&self, root: &Path) -> PathBuf;
}
