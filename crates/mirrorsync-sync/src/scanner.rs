//! Directory scanning
//!
//! A [`ListingSource`] produces the items currently present on one side of
//! the mirror. Scans are synchronous and meant to run on a blocking thread;
//! the [`DirectoryMonitor`](crate::watcher::DirectoryMonitor) turns
//! successive scans into listings.
//!
//! Only regular files directly inside the root with the configured
//! extension are reported. Hidden files and in-progress writes are skipped.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mirrorsync_core::domain::{
    CloudItem, CloudListing, ContentItem, ContentListing, DownloadStatus, FileIdentity,
    LocalItem, LocalListing, SyncError,
};
use mirrorsync_core::ports::MonitorEvent;
use tracing::{debug, warn};

use crate::container::{PLACEHOLDER_SUFFIX, VERSIONS_DIR};
use crate::filesystem;

/// One side of the mirror that can be scanned into items
pub trait ListingSource: Send + Sync + 'static {
    type Item: ContentItem + PartialEq;

    /// Directory this source scans
    fn root(&self) -> &Path;

    /// Fails with the side's environment error if the root cannot be used
    fn check_root(&self) -> Result<(), SyncError>;

    /// Lists the items currently present
    fn scan(&self) -> Result<Vec<Self::Item>, SyncError>;

    /// Wraps a listing in the event for this side
    fn listing_event(listing: ContentListing<Self::Item>) -> MonitorEvent;

    /// Wraps an error in the event for this side
    fn error_event(error: SyncError) -> MonitorEvent;
}

// ============================================================================
// Local directory
// ============================================================================

/// Scans the local directory
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
    extension: String,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }
}

impl ListingSource for LocalSource {
    type Item = LocalItem;

    fn root(&self) -> &Path {
        &self.root
    }

    fn check_root(&self) -> Result<(), SyncError> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(SyncError::LocalDirectoryUnavailable(self.root.clone())),
        }
    }

    fn scan(&self) -> Result<Vec<LocalItem>, SyncError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::LocalDirectoryUnavailable(self.root.clone()),
            _ => SyncError::LocalDirectoryUnreadable(format!("{}: {e}", self.root.display())),
        })?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                SyncError::LocalDirectoryUnreadable(format!("{}: {e}", self.root.display()))
            })?;
            let path = entry.path();
            let Some(identity) = candidate(&path, &self.extension) else {
                continue;
            };
            match describe_file(&path) {
                Ok(Some((last_modified, size, hash))) => items.push(LocalItem {
                    identity,
                    path,
                    last_modified,
                    size,
                    content_hash: Some(hash),
                }),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }
        debug!(root = %self.root.display(), count = items.len(), "Scanned local directory");
        Ok(items)
    }

    fn listing_event(listing: LocalListing) -> MonitorEvent {
        MonitorEvent::local(listing)
    }

    fn error_event(error: SyncError) -> MonitorEvent {
        MonitorEvent::LocalError(error)
    }
}

// ============================================================================
// Cloud container
// ============================================================================

/// Scans the cloud mirror directory
///
/// Besides regular files it reports placeholders (`.<name>.icloud`) as
/// items that are not downloaded, and flags items that have entries under
/// `.versions/<name>/` as carrying unresolved conflicts.
#[derive(Debug, Clone)]
pub struct CloudSource {
    root: PathBuf,
    extension: String,
}

impl CloudSource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    fn has_conflicts(&self, identity: &FileIdentity) -> bool {
        std::fs::read_dir(self.root.join(VERSIONS_DIR).join(identity.as_str()))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}

impl ListingSource for CloudSource {
    type Item = CloudItem;

    fn root(&self) -> &Path {
        &self.root
    }

    fn check_root(&self) -> Result<(), SyncError> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(SyncError::ContainerNotFound(self.root.clone())),
        }
    }

    fn scan(&self) -> Result<Vec<CloudItem>, SyncError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::ContainerNotFound(self.root.clone()),
            _ => SyncError::io(&self.root, &e),
        })?;

        let mut current = Vec::new();
        let mut placeholders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.root, &e))?;
            let path = entry.path();

            if let Some(identity) = placeholder_identity(&path, &self.extension) {
                match std::fs::metadata(&path).and_then(|m| filesystem::mtime(&m)) {
                    Ok(last_modified) => placeholders.push((identity, last_modified)),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable placeholder")
                    }
                }
                continue;
            }

            let Some(identity) = candidate(&path, &self.extension) else {
                continue;
            };
            match describe_file(&path) {
                Ok(Some((last_modified, _, hash))) => current.push(CloudItem {
                    relative_path: PathBuf::from(identity.as_str()),
                    has_unresolved_conflicts: self.has_conflicts(&identity),
                    identity,
                    last_modified,
                    download_status: DownloadStatus::Current,
                    content_hash: Some(hash),
                }),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }

        // A real file wins over a stale placeholder of the same name
        for (identity, last_modified) in placeholders {
            if current.iter().any(|item| item.identity == identity) {
                continue;
            }
            current.push(CloudItem {
                relative_path: PathBuf::from(identity.as_str()),
                has_unresolved_conflicts: false,
                identity,
                last_modified,
                download_status: DownloadStatus::NotDownloaded,
                content_hash: None,
            });
        }

        debug!(root = %self.root.display(), count = current.len(), "Scanned cloud container");
        Ok(current)
    }

    fn listing_event(listing: CloudListing) -> MonitorEvent {
        MonitorEvent::cloud(listing)
    }

    fn error_event(error: SyncError) -> MonitorEvent {
        MonitorEvent::CloudError(error)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Identity of a visible file carrying `extension`, if `path` is one
fn candidate(path: &Path, extension: &str) -> Option<FileIdentity> {
    let identity = FileIdentity::from_path(path).ok()?;
    let name = identity.as_str();
    if name.starts_with('.') || filesystem::is_temp_name(name) {
        return None;
    }
    identity.has_extension(extension).then_some(identity)
}

/// Identity a `.<name>.icloud` placeholder stands for
fn placeholder_identity(path: &Path, extension: &str) -> Option<FileIdentity> {
    let name = path.file_name()?.to_str()?;
    let inner = name.strip_prefix('.')?.strip_suffix(PLACEHOLDER_SUFFIX)?;
    let identity = FileIdentity::new(inner).ok()?;
    identity.has_extension(extension).then_some(identity)
}

type FileFacts = (chrono::DateTime<chrono::Utc>, u64, mirrorsync_core::domain::ContentHash);

/// Timestamp, size and hash of a regular file; `None` for anything else
fn describe_file(path: &Path) -> std::io::Result<Option<FileFacts>> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !meta.is_file() {
        return Ok(None);
    }
    let hash = match filesystem::hash_file_blocking(path) {
        Ok(hash) => hash,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(Some((filesystem::mtime(&meta)?, meta.len(), hash)))
}
