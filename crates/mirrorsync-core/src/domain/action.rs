//! Actions produced by reconciliation
//!
//! Each [`Action`] carries the item(s) the executor needs, so executing it
//! never has to consult reconciler state.

use std::fmt::{self, Display, Formatter};

use super::errors::SyncError;
use super::listing::{CloudItem, LocalItem};
use super::newtypes::FileIdentity;

/// Which side of the mirror an action writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Writes the local directory
    ToLocal,
    /// Writes the cloud container
    ToCloud,
}

/// One step required to bring the two sides back in agreement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Copy a cloud item that has no local counterpart
    CreateLocal(CloudItem),
    /// Overwrite the local copy with a newer cloud item
    UpdateLocal(CloudItem),
    /// Delete the local copy of an item removed from the cloud
    RemoveLocal(CloudItem),
    /// Ask the provider to materialize a placeholder
    StartDownload(CloudItem),
    /// Copy a local item that has no cloud counterpart
    CreateCloud(LocalItem),
    /// Overwrite the cloud copy with a newer local item
    UpdateCloud(LocalItem),
    /// Trash the cloud copy of an item removed locally
    RemoveCloud(LocalItem),
    /// Pick a winner among the provider's conflicting versions
    ResolveVersionConflict(CloudItem),
    /// Keep both copies of an item that differs on first sync
    ResolveInitialSyncConflict { local: LocalItem, cloud: CloudItem },
    /// Persist that the first-ever synchronization finished
    MarkInitialSyncDone,
    /// Surface an error to the orchestrator
    ReportError(SyncError),
}

impl Action {
    /// The file this action concerns, if any
    pub fn identity(&self) -> Option<&FileIdentity> {
        match self {
            Action::CreateLocal(item)
            | Action::UpdateLocal(item)
            | Action::RemoveLocal(item)
            | Action::StartDownload(item)
            | Action::ResolveVersionConflict(item) => Some(&item.identity),
            Action::CreateCloud(item) | Action::UpdateCloud(item) | Action::RemoveCloud(item) => {
                Some(&item.identity)
            }
            Action::ResolveInitialSyncConflict { local, .. } => Some(&local.identity),
            Action::MarkInitialSyncDone | Action::ReportError(_) => None,
        }
    }

    /// The side this action writes to, for create/update/remove actions
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Action::CreateLocal(_) | Action::UpdateLocal(_) | Action::RemoveLocal(_) => {
                Some(Direction::ToLocal)
            }
            Action::CreateCloud(_) | Action::UpdateCloud(_) | Action::RemoveCloud(_) => {
                Some(Direction::ToCloud)
            }
            _ => None,
        }
    }

    /// Returns true for the two conflict-resolution actions
    pub fn is_conflict_resolution(&self) -> bool {
        matches!(
            self,
            Action::ResolveVersionConflict(_) | Action::ResolveInitialSyncConflict { .. }
        )
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateLocal(_) => "create_local",
            Action::UpdateLocal(_) => "update_local",
            Action::RemoveLocal(_) => "remove_local",
            Action::StartDownload(_) => "start_download",
            Action::CreateCloud(_) => "create_cloud",
            Action::UpdateCloud(_) => "update_cloud",
            Action::RemoveCloud(_) => "remove_cloud",
            Action::ResolveVersionConflict(_) => "resolve_version_conflict",
            Action::ResolveInitialSyncConflict { .. } => "resolve_initial_sync_conflict",
            Action::MarkInitialSyncDone => "mark_initial_sync_done",
            Action::ReportError(_) => "report_error",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Action::ReportError(err) => write!(f, "{}({})", self.name(), err),
            _ => match self.identity() {
                Some(identity) => write!(f, "{}({})", self.name(), identity),
                None => write!(f, "{}", self.name()),
            },
        }
    }
}
