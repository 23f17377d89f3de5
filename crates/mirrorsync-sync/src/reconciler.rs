//! Reconciliation of local and cloud listings
//!
//! The [`Reconciler`] folds monitor events into the last known listing of
//! each side and, once both sides have delivered a full gather, diffs them
//! by [`FileIdentity`] into the [`Action`]s that bring them back in
//! agreement.
//!
//! ## Rules
//!
//! - Until both sides completed a full gather no action is produced, except
//!   that monitor errors are reported immediately.
//! - Listings at or below the stored generation are discarded.
//! - A file present on one side only is created on the other, unless the
//!   other side dropped it in this very pass, in which case the removal is
//!   propagated instead.
//! - A file present on both sides is compared by timestamp; on an exact tie
//!   with differing content the cloud copy wins.
//! - Cloud items that are not materialized yet are downloaded first. The
//!   identity stays pending until a later cloud listing reports it current.
//! - During the first-ever synchronization differing copies are kept both.
//!   It ends once every file present on both sides agrees, with nothing
//!   pending, failed or in conflict.
//! - Conflict resolutions come first in every batch.
//! - Identities whose action failed are examined again on the next pass.

use std::collections::{BTreeMap, BTreeSet};

use mirrorsync_conflict::{Comparison, ConflictDetector};
use mirrorsync_core::domain::{
    Action, CloudItem, CloudListing, ContentItem, ContentListing, DownloadStatus, FileIdentity,
    LocalItem, LocalListing,
};
use mirrorsync_core::ports::MonitorEvent;
use tracing::{debug, info, trace, warn};

// ============================================================================
// SyncState
// ============================================================================

/// What the reconciler knows about both sides
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    last_local: Option<LocalListing>,
    last_cloud: Option<CloudListing>,
    initial_sync_completed: bool,
    is_initial_synchronization: bool,
}

impl SyncState {
    /// Empty state for a session
    ///
    /// `initial_sync_completed` comes from durable storage; when it is false
    /// the session performs the first-ever synchronization.
    pub fn new(initial_sync_completed: bool) -> Self {
        Self {
            last_local: None,
            last_cloud: None,
            initial_sync_completed,
            is_initial_synchronization: !initial_sync_completed,
        }
    }

    pub fn last_local(&self) -> Option<&LocalListing> {
        self.last_local.as_ref()
    }

    pub fn last_cloud(&self) -> Option<&CloudListing> {
        self.last_cloud.as_ref()
    }

    pub fn initial_sync_completed(&self) -> bool {
        self.initial_sync_completed
    }

    pub fn is_initial_synchronization(&self) -> bool {
        self.is_initial_synchronization
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Turns monitor events into actions
#[derive(Debug, Clone)]
pub struct Reconciler {
    state: SyncState,
    pending_downloads: BTreeSet<FileIdentity>,
    retry: BTreeSet<FileIdentity>,
}

/// What absorbing one listing changed in the stored snapshot
struct Absorbed<T> {
    full: bool,
    touched: BTreeSet<FileIdentity>,
    dropped: Vec<T>,
}

/// Items dropped from either side during the current pass
#[derive(Default)]
struct Dropped {
    local: BTreeMap<FileIdentity, LocalItem>,
    cloud: BTreeMap<FileIdentity, CloudItem>,
}

impl Reconciler {
    pub fn new(initial_sync_completed: bool) -> Self {
        Self {
            state: SyncState::new(initial_sync_completed),
            pending_downloads: BTreeSet::new(),
            retry: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Returns true once both sides delivered a full gather
    pub fn is_ready(&self) -> bool {
        self.state.last_local.is_some() && self.state.last_cloud.is_some()
    }

    /// Identities waiting for the provider to finish a download
    pub fn pending_downloads(&self) -> &BTreeSet<FileIdentity> {
        &self.pending_downloads
    }

    /// Records that executing `action` failed
    ///
    /// The identity is reconsidered on the next pass; a failed download
    /// request is issued again then.
    pub fn action_failed(&mut self, action: &Action) {
        let Some(identity) = action.identity() else {
            return;
        };
        if matches!(action, Action::StartDownload(_)) {
            self.pending_downloads.remove(identity);
        }
        debug!(file = %identity, action = action.name(), "Will reconsider after failure");
        self.retry.insert(identity.clone());
    }

    /// Forgets both listings, keeping the durable initial-sync flag
    pub fn reset(&mut self) {
        *self = Self::new(self.state.initial_sync_completed);
    }

    /// Folds `event` into the state and returns the actions it calls for
    pub fn resolve(&mut self, event: MonitorEvent) -> Vec<Action> {
        let was_ready = self.is_ready();
        trace!(event = event.name(), "Resolving monitor event");

        let (full, touched, dropped) = match event {
            MonitorEvent::LocalError(err) | MonitorEvent::CloudError(err) => {
                return vec![Action::ReportError(err)];
            }
            MonitorEvent::LocalGatherComplete(listing) | MonitorEvent::LocalUpdate(listing) => {
                let Some(absorbed) = absorb(&mut self.state.last_local, listing, "local") else {
                    return Vec::new();
                };
                let dropped = Dropped {
                    local: by_identity(absorbed.dropped),
                    ..Dropped::default()
                };
                (absorbed.full, absorbed.touched, dropped)
            }
            MonitorEvent::CloudGatherComplete(listing) | MonitorEvent::CloudUpdate(listing) => {
                let Some(absorbed) = absorb(&mut self.state.last_cloud, listing, "cloud") else {
                    return Vec::new();
                };
                let dropped = Dropped {
                    cloud: by_identity(absorbed.dropped),
                    ..Dropped::default()
                };
                (absorbed.full, absorbed.touched, dropped)
            }
        };

        let (Some(local), Some(cloud)) = (&self.state.last_local, &self.state.last_cloud) else {
            debug!("Waiting for both sides to complete a full gather");
            return Vec::new();
        };

        let retry = std::mem::take(&mut self.retry);
        let keys: BTreeSet<FileIdentity> = if !was_ready || full {
            local
                .identities()
                .chain(cloud.identities())
                .chain(dropped.local.keys())
                .chain(dropped.cloud.keys())
                .cloned()
                .collect()
        } else {
            touched.into_iter().chain(retry).collect()
        };

        let pairs: Vec<_> = keys
            .iter()
            .map(|key| (key, local.get(key).cloned(), cloud.get(key).cloned()))
            .collect();

        let mut actions = Vec::new();
        for (key, local_item, cloud_item) in pairs {
            if let Some(action) = self.decide(key, local_item, cloud_item, &dropped) {
                actions.push(action);
            }
        }

        // Stable: keeps identity order within each group
        actions.sort_by_key(|a| !a.is_conflict_resolution());

        if self.state.is_initial_synchronization && self.initial_sync_settled(&actions) {
            info!("Initial synchronization finished");
            self.state.is_initial_synchronization = false;
            self.state.initial_sync_completed = true;
            actions.push(Action::MarkInitialSyncDone);
        }

        debug!(
            keys = keys.len(),
            actions = actions.len(),
            pending = self.pending_downloads.len(),
            "Reconciliation pass complete"
        );
        actions
    }

    /// True when nothing left from the first synchronization could lose data
    ///
    /// Looks at every identity both stored listings share, not only the ones
    /// this pass touched.
    fn initial_sync_settled(&self, actions: &[Action]) -> bool {
        if !self.pending_downloads.is_empty() || !self.retry.is_empty() {
            return false;
        }
        if actions
            .iter()
            .any(|a| a.is_conflict_resolution() || matches!(a, Action::ReportError(_)))
        {
            return false;
        }
        let (Some(local), Some(cloud)) = (&self.state.last_local, &self.state.last_cloud) else {
            return false;
        };
        local
            .identities()
            .filter_map(|key| Some((local.get(key)?, cloud.get(key)?)))
            .all(|(l, c)| {
                !c.has_unresolved_conflicts
                    && matches!(c.download_status, DownloadStatus::Current)
                    && !ConflictDetector::content_differs(l, c)
            })
    }

    fn decide(
        &mut self,
        key: &FileIdentity,
        local: Option<LocalItem>,
        cloud: Option<CloudItem>,
        dropped: &Dropped,
    ) -> Option<Action> {
        match (local, cloud) {
            (Some(local), Some(cloud)) => self.both_sides(local, cloud),
            (Some(local), None) => {
                self.pending_downloads.remove(key);
                match dropped.cloud.get(key) {
                    Some(gone) if local.last_modified <= gone.last_modified => {
                        Some(Action::RemoveLocal(gone.clone()))
                    }
                    _ => Some(Action::CreateCloud(local)),
                }
            }
            (None, Some(cloud)) => match dropped.local.get(key) {
                Some(gone) if cloud.last_modified <= gone.last_modified => {
                    self.pending_downloads.remove(key);
                    Some(Action::RemoveCloud(gone.clone()))
                }
                _ => self.cloud_only(cloud),
            },
            (None, None) => {
                self.pending_downloads.remove(key);
                None
            }
        }
    }

    fn both_sides(&mut self, local: LocalItem, cloud: CloudItem) -> Option<Action> {
        if cloud.has_unresolved_conflicts {
            return self.fetch(cloud, Action::ResolveVersionConflict);
        }
        if let DownloadStatus::Failed(err) = &cloud.download_status {
            warn!(file = %cloud.identity, error = %err, "Cloud item failed to download");
            return Some(Action::ReportError(err.clone()));
        }
        if self.state.is_initial_synchronization
            && ConflictDetector::content_differs(&local, &cloud)
        {
            return self.fetch(cloud, |cloud| Action::ResolveInitialSyncConflict {
                local,
                cloud,
            });
        }

        match ConflictDetector::compare(&local, &cloud) {
            Comparison::InSync => {
                self.pending_downloads.remove(&cloud.identity);
                None
            }
            Comparison::LocalNewer => {
                self.pending_downloads.remove(&cloud.identity);
                Some(Action::UpdateCloud(local))
            }
            Comparison::CloudNewer | Comparison::TieCloudWins => {
                self.fetch(cloud, Action::UpdateLocal)
            }
        }
    }

    fn cloud_only(&mut self, cloud: CloudItem) -> Option<Action> {
        if cloud.has_unresolved_conflicts {
            self.fetch(cloud, Action::ResolveVersionConflict)
        } else {
            self.fetch(cloud, Action::CreateLocal)
        }
    }

    /// Runs `then` once `cloud` is materialized, downloading it otherwise
    fn fetch<F>(&mut self, cloud: CloudItem, then: F) -> Option<Action>
    where
        F: FnOnce(CloudItem) -> Action,
    {
        match cloud.download_status.clone() {
            DownloadStatus::Current => {
                self.pending_downloads.remove(&cloud.identity);
                Some(then(cloud))
            }
            DownloadStatus::Downloading => {
                self.pending_downloads.insert(cloud.identity.clone());
                None
            }
            DownloadStatus::NotDownloaded => {
                if self.pending_downloads.insert(cloud.identity.clone()) {
                    debug!(file = %cloud.identity, "Requesting download");
                    Some(Action::StartDownload(cloud))
                } else {
                    None
                }
            }
            DownloadStatus::Failed(err) => {
                self.pending_downloads.remove(&cloud.identity);
                Some(Action::ReportError(err))
            }
        }
    }
}

fn absorb<T: ContentItem>(
    slot: &mut Option<ContentListing<T>>,
    incoming: ContentListing<T>,
    side: &'static str,
) -> Option<Absorbed<T>> {
    match slot {
        None if !incoming.is_full_gather() => {
            debug!(side, generation = %incoming.generation(), "Ignoring update before first full gather");
            None
        }
        None => {
            let touched = incoming.identities().cloned().collect();
            *slot = Some(incoming);
            Some(Absorbed {
                full: true,
                touched,
                dropped: Vec::new(),
            })
        }
        Some(stored) => {
            if incoming.generation() <= stored.generation() {
                debug!(
                    side,
                    incoming = %incoming.generation(),
                    stored = %stored.generation(),
                    "Discarding stale listing"
                );
                return None;
            }
            let full = incoming.is_full_gather();
            let mut touched: BTreeSet<FileIdentity> = incoming.identities().cloned().collect();
            touched.extend(incoming.removed().iter().cloned());
            let dropped = stored.apply(&incoming);
            touched.extend(dropped.iter().map(|item| item.identity().clone()));
            Some(Absorbed {
                full,
                touched,
                dropped,
            })
        }
    }
}

fn by_identity<T: ContentItem>(items: Vec<T>) -> BTreeMap<FileIdentity, T> {
    items
        .into_iter()
        .map(|item| (item.identity().clone(), item))
        .collect()
}
