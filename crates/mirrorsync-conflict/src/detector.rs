//! Conflict detection logic
//!
//! Decides which copy of a file present on both sides is authoritative by
//! comparing modification timestamps, falling back on content hashes when
//! the timestamps tie.

use mirrorsync_core::domain::ContentItem;

/// Outcome of comparing the local and cloud copies of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Both copies hold the same content; nothing to do
    InSync,
    /// The local copy is newer and should be uploaded
    LocalNewer,
    /// The cloud copy is newer and should be downloaded
    CloudNewer,
    /// Same timestamp, different content; the cloud copy wins
    TieCloudWins,
}

/// Detects which side holds the current version of a file
pub struct ConflictDetector;

impl ConflictDetector {
    /// Compares the two copies of a file
    ///
    /// Equal content hashes mean the copies are in sync whatever their
    /// timestamps say. Otherwise the newer timestamp wins. On an exact
    /// timestamp tie the cloud copy wins if the hashes show the content
    /// differs; without hashes a tie counts as in sync.
    pub fn compare<L, C>(local: &L, cloud: &C) -> Comparison
    where
        L: ContentItem,
        C: ContentItem,
    {
        if let (Some(l), Some(c)) = (local.content_hash(), cloud.content_hash()) {
            if l == c {
                return Comparison::InSync;
            }
        }

        match local.last_modified().cmp(&cloud.last_modified()) {
            std::cmp::Ordering::Greater => Comparison::LocalNewer,
            std::cmp::Ordering::Less => Comparison::CloudNewer,
            std::cmp::Ordering::Equal => {
                if Self::hashes_differ(local, cloud) {
                    Comparison::TieCloudWins
                } else {
                    Comparison::InSync
                }
            }
        }
    }

    /// Returns true if the two copies cannot be shown to hold the same bytes
    ///
    /// Used on the first-ever sync, where there is no shared history to
    /// arbitrate by. Known hashes decide; without them differing timestamps
    /// count as different content.
    pub fn content_differs<L, C>(local: &L, cloud: &C) -> bool
    where
        L: ContentItem,
        C: ContentItem,
    {
        match (local.content_hash(), cloud.content_hash()) {
            (Some(l), Some(c)) => l != c,
            _ => local.last_modified() != cloud.last_modified(),
        }
    }

    fn hashes_differ<L: ContentItem, C: ContentItem>(local: &L, cloud: &C) -> bool {
        matches!(
            (local.content_hash(), cloud.content_hash()),
            (Some(l), Some(c)) if l != c
        )
    }
}
