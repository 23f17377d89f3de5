//! Content listings
//!
//! A [`ContentListing`] is an immutable snapshot of one side's files, keyed
//! by [`FileIdentity`]. Monitors emit a full gather once per start and
//! incremental deltas afterwards; the reconciler folds deltas into the
//! listing it keeps with [`ContentListing::apply`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SyncError;
use super::newtypes::{ContentHash, FileIdentity, Generation};

// ============================================================================
// ContentItem
// ============================================================================

/// Metadata shared by local and cloud items
pub trait ContentItem: Clone + Debug + Send + Sync + 'static {
    /// The key this item is reconciled under
    fn identity(&self) -> &FileIdentity;

    /// Last content modification time
    fn last_modified(&self) -> DateTime<Utc>;

    /// Content digest, when the side could compute one
    fn content_hash(&self) -> Option<&ContentHash>;
}

/// A file in the local directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalItem {
    pub identity: FileIdentity,
    /// Absolute path of the file on disk
    pub path: PathBuf,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub content_hash: Option<ContentHash>,
}

impl LocalItem {
    /// Where this item lives inside the cloud container rooted at `cloud_root`
    pub fn cloud_path_in(&self, cloud_root: &Path) -> PathBuf {
        cloud_root.join(self.identity.as_str())
    }
}

impl ContentItem for LocalItem {
    fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    fn content_hash(&self) -> Option<&ContentHash> {
        self.content_hash.as_ref()
    }
}

/// Materialization state of a cloud item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Only a placeholder exists on this device
    NotDownloaded,
    /// The provider is fetching the bytes
    Downloading,
    /// The bytes on disk are the current version
    Current,
    /// The provider reported a failure for this item
    Failed(SyncError),
}

impl DownloadStatus {
    /// Returns true if the item's bytes can be read right now
    pub fn is_materialized(&self) -> bool {
        matches!(self, DownloadStatus::Current)
    }
}

/// A file in the cloud mirror directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudItem {
    pub identity: FileIdentity,
    /// Path relative to the cloud container root
    pub relative_path: PathBuf,
    pub last_modified: DateTime<Utc>,
    pub download_status: DownloadStatus,
    pub has_unresolved_conflicts: bool,
    pub content_hash: Option<ContentHash>,
}

impl CloudItem {
    /// Absolute path of this item inside the container rooted at `cloud_root`
    pub fn path_in(&self, cloud_root: &Path) -> PathBuf {
        cloud_root.join(&self.relative_path)
    }

    /// Where this item is mirrored inside `local_root`
    pub fn local_path_in(&self, local_root: &Path) -> PathBuf {
        local_root.join(self.identity.as_str())
    }
}

impl ContentItem for CloudItem {
    fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    fn content_hash(&self) -> Option<&ContentHash> {
        self.content_hash.as_ref()
    }
}

// ============================================================================
// ContentListing
// ============================================================================

/// Whether a listing is a complete snapshot or a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// Complete snapshot of the side
    FullGather,
    /// Changes since the previous listing
    Update,
}

/// Snapshot or delta of one side's files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentListing<T: ContentItem> {
    generation: Generation,
    kind: ListingKind,
    items: BTreeMap<FileIdentity, T>,
    removed: BTreeSet<FileIdentity>,
}

/// Listing of the local directory
pub type LocalListing = ContentListing<LocalItem>;

/// Listing of the cloud mirror directory
pub type CloudListing = ContentListing<CloudItem>;

impl<T: ContentItem> ContentListing<T> {
    /// Creates a full-gather snapshot
    ///
    /// If `items` repeats an identity the last occurrence wins.
    pub fn full(generation: Generation, items: impl IntoIterator<Item = T>) -> Self {
        Self {
            generation,
            kind: ListingKind::FullGather,
            items: index(items),
            removed: BTreeSet::new(),
        }
    }

    /// Creates an incremental delta
    ///
    /// An identity reported both as changed and removed is treated as
    /// changed; the later observation is the one carrying an item.
    pub fn update(
        generation: Generation,
        changed: impl IntoIterator<Item = T>,
        removed: impl IntoIterator<Item = FileIdentity>,
    ) -> Self {
        let items = index(changed);
        let removed = removed
            .into_iter()
            .filter(|id| !items.contains_key(id))
            .collect();
        Self {
            generation,
            kind: ListingKind::Update,
            items,
            removed,
        }
    }

    /// An empty snapshot at generation zero
    pub fn empty() -> Self {
        Self::full(Generation::ZERO, Vec::new())
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn kind(&self) -> ListingKind {
        self.kind
    }

    pub fn is_full_gather(&self) -> bool {
        self.kind == ListingKind::FullGather
    }

    pub fn get(&self, identity: &FileIdentity) -> Option<&T> {
        self.items.get(identity)
    }

    pub fn contains(&self, identity: &FileIdentity) -> bool {
        self.items.contains_key(identity)
    }

    /// Items present in this listing, ordered by identity
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn identities(&self) -> impl Iterator<Item = &FileIdentity> {
        self.items.keys()
    }

    /// Identities a delta reports as gone (always empty for a full gather)
    pub fn removed(&self) -> &BTreeSet<FileIdentity> {
        &self.removed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if a delta carries neither changes nor removals
    pub fn is_noop(&self) -> bool {
        self.items.is_empty() && self.removed.is_empty()
    }

    /// Folds `incoming` into this listing
    ///
    /// A full gather replaces the contents; an update overrides the items it
    /// carries and deletes the identities it reports removed. The result is
    /// always a snapshot stamped with the incoming generation.
    ///
    /// Returns the items dropped from the snapshot, which for a full gather
    /// are the identities it no longer reports.
    pub fn apply(&mut self, incoming: &ContentListing<T>) -> Vec<T> {
        let dropped = match incoming.kind {
            ListingKind::FullGather => {
                let previous = std::mem::replace(&mut self.items, incoming.items.clone());
                previous
                    .into_iter()
                    .filter(|(id, _)| !incoming.items.contains_key(id))
                    .map(|(_, item)| item)
                    .collect()
            }
            ListingKind::Update => {
                let dropped = incoming
                    .removed
                    .iter()
                    .filter_map(|id| self.items.remove(id))
                    .collect();
                for (id, item) in &incoming.items {
                    self.items.insert(id.clone(), item.clone());
                }
                dropped
            }
        };
        self.generation = incoming.generation;
        self.kind = ListingKind::FullGather;
        self.removed.clear();
        dropped
    }
}

fn index<T: ContentItem>(items: impl IntoIterator<Item = T>) -> BTreeMap<FileIdentity, T> {
    items
        .into_iter()
        .map(|item| (item.identity().clone(), item))
        .collect()
}
