//! Cloud container backed by a plain mirror directory
//!
//! Layout of the directory:
//!
//! ```text
//! <root>/
//!   Hiking.kml                  current version of an item
//!   .Notes.kml.icloud           placeholder: Notes.kml is not downloaded
//!   .Trash/                     removed items
//!   .versions/Hiking.kml/*      unresolved conflicting versions of Hiking.kml
//! ```
//!
//! The provider that keeps this directory in sync with remote storage is
//! outside the engine; this adapter only follows its conventions.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mirrorsync_core::domain::{CloudItem, FileIdentity, SyncError};
use mirrorsync_core::ports::{FileVersion, ICloudContainer};
use tracing::{debug, instrument};

use crate::filesystem;

/// Directory receiving trashed items
pub const TRASH_DIR: &str = ".Trash";

/// Directory holding conflicting versions, one subdirectory per item
pub const VERSIONS_DIR: &str = ".versions";

/// Suffix of placeholder files standing in for items not downloaded yet
pub const PLACEHOLDER_SUFFIX: &str = ".icloud";

/// [`ICloudContainer`] over a mirror directory on the local filesystem
#[derive(Debug, Clone)]
pub struct MirrorContainer {
    root: PathBuf,
}

impl MirrorContainer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the conflicting versions of `identity`
    pub fn versions_dir(&self, identity: &FileIdentity) -> PathBuf {
        self.root.join(VERSIONS_DIR).join(identity.as_str())
    }
}

#[async_trait]
impl ICloudContainer for MirrorContainer {
    async fn resolve_root(&self) -> Result<PathBuf, SyncError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(self.root.clone()),
            _ => Err(SyncError::ContainerNotFound(self.root.clone())),
        }
    }

    async fn start_downloading(&self, item: &CloudItem) -> Result<(), SyncError> {
        self.resolve_root().await?;
        debug!(file = %item.identity, "Download requested from provider");
        Ok(())
    }

    #[instrument(skip(self, item), fields(file = %item.identity))]
    async fn conflict_versions(&self, item: &CloudItem) -> Result<Vec<FileVersion>, SyncError> {
        let dir = self.versions_dir(&item.identity);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::io(&dir, &e)),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::io(&dir, &e))?
        {
            let path = entry.path();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| SyncError::io(&path, &e))?;
            if !meta.is_file() {
                continue;
            }
            let last_modified = filesystem::mtime(&meta).map_err(|e| SyncError::io(&path, &e))?;
            versions.push(FileVersion {
                path,
                last_modified,
            });
        }
        versions.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(count = versions.len(), "Found conflicting versions");
        Ok(versions)
    }

    async fn replace_with_version(
        &self,
        item: &CloudItem,
        version: &FileVersion,
    ) -> Result<(), SyncError> {
        filesystem::copy_preserving(&version.path, &item.path_in(&self.root)).await
    }

    async fn remove_other_versions(&self, item: &CloudItem) -> Result<(), SyncError> {
        let dir = self.versions_dir(&item.identity);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(&dir, &e)),
        }
    }

    fn trash_dir(&self, root: &Path) -> PathBuf {
        root.join(TRASH_DIR)
    }
}
