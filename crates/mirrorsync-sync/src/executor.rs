//! Action execution
//!
//! The [`ActionExecutor`] performs one [`Action`] per call against the local
//! directory and the cloud container. Every file access goes through the
//! shared [`FileCoordinator`], so actions for the same path never overlap
//! while actions for different files may run concurrently.
//!
//! ## Idempotence
//!
//! Each action can be executed again after a partial failure:
//! - writes are atomic and carry the source's modification time
//! - removals succeed when the target is already gone
//! - a conflict copy reuses an earlier copy holding the same bytes and
//!   otherwise goes to a free name
//! - a version conflict whose current content already is the latest
//!   version only discards the remaining versions
//!
//! The executor never retries; a failed action is reported to the caller and
//! the next reconciliation pass issues it again if it is still needed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mirrorsync_conflict::{generate_new_file_url, latest_version, ConflictError, MAX_RENAME_ATTEMPTS};
use mirrorsync_core::domain::{Action, CloudItem, ContentHash, LocalItem, SyncError};
use mirrorsync_core::ports::{ICloudContainer, ISyncStateStore};
use tracing::{debug, info, instrument, warn};

use crate::coordinator::FileCoordinator;
use crate::filesystem;

/// What executing an action did to the stored files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The local directory is unchanged
    None,
    /// Files in the local directory were written or removed
    LocalChanged,
}

impl Effect {
    pub fn touched_local(&self) -> bool {
        matches!(self, Effect::LocalChanged)
    }
}

/// What a candidate conflict copy path currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    SameContent,
    Taken,
}

/// Outcome of an initial-sync conflict
enum KeptBoth {
    AlreadyIdentical,
    Resolved(Option<PathBuf>),
}

/// Executes reconciliation actions against both sides of the mirror
pub struct ActionExecutor {
    local_root: PathBuf,
    container: Arc<dyn ICloudContainer>,
    state_store: Arc<dyn ISyncStateStore>,
    coordinator: Arc<FileCoordinator>,
    device_name: String,
}

impl ActionExecutor {
    /// Creates an executor with its own file coordinator
    ///
    /// # Arguments
    /// * `local_root` - The local directory being mirrored
    /// * `container` - The cloud container the directory is mirrored into
    /// * `state_store` - Durable storage for the initial-sync flag
    /// * `device_name` - Embedded in the names of initial-sync conflict copies
    pub fn new(
        local_root: impl Into<PathBuf>,
        container: Arc<dyn ICloudContainer>,
        state_store: Arc<dyn ISyncStateStore>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            local_root: local_root.into(),
            container,
            state_store,
            coordinator: Arc::new(FileCoordinator::new()),
            device_name: device_name.into(),
        }
    }

    /// Shares `coordinator` with other code paths touching the same files
    pub fn with_coordinator(mut self, coordinator: Arc<FileCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Executes a single action
    ///
    /// # Errors
    /// Returns the error the action failed with. `ReportError` actions
    /// return their error unchanged.
    #[instrument(skip(self, action), fields(action = %action))]
    pub async fn execute(&self, action: &Action) -> Result<Effect, SyncError> {
        let effect = match action {
            Action::CreateLocal(item) | Action::UpdateLocal(item) => self.write_local(item).await?,
            Action::RemoveLocal(item) => self.remove_local(item).await?,
            Action::StartDownload(item) => {
                self.container.start_downloading(item).await?;
                debug!(file = %item.identity, "Download requested");
                Effect::None
            }
            Action::CreateCloud(item) | Action::UpdateCloud(item) => self.write_cloud(item).await?,
            Action::RemoveCloud(item) => self.remove_cloud(item).await?,
            Action::ResolveVersionConflict(item) => self.resolve_version_conflict(item).await?,
            Action::ResolveInitialSyncConflict { local, cloud } => {
                self.resolve_initial_sync_conflict(local, cloud).await?
            }
            Action::MarkInitialSyncDone => {
                self.state_store
                    .mark_initial_sync_finished()
                    .await
                    .map_err(|e| SyncError::Other(format!("{e:#}")))?;
                info!("Initial synchronization recorded");
                Effect::None
            }
            Action::ReportError(err) => return Err(err.clone()),
        };
        Ok(effect)
    }

    // ========================================================================
    // Cloud -> local
    // ========================================================================

    async fn write_local(&self, item: &CloudItem) -> Result<Effect, SyncError> {
        let root = self.container.resolve_root().await?;
        let source = item.path_in(&root);
        let target = item.local_path_in(&self.local_root);

        self.coordinator
            .coordinate(&[source.as_path(), target.as_path()], || async {
                let (data, modified) = filesystem::read_with_mtime(&source)
                    .await
                    .map_err(|e| unavailable_if_missing(e, item))?;
                filesystem::write_atomic(&target, &data, modified).await
            })
            .await?;

        debug!(file = %item.identity, "Wrote local copy");
        Ok(Effect::LocalChanged)
    }

    async fn remove_local(&self, item: &CloudItem) -> Result<Effect, SyncError> {
        let target = item.local_path_in(&self.local_root);
        let removed = self
            .coordinator
            .coordinate(&[target.as_path()], || filesystem::remove_if_exists(&target))
            .await?;

        if removed {
            debug!(file = %item.identity, "Removed local copy");
            Ok(Effect::LocalChanged)
        } else {
            debug!(file = %item.identity, "Local copy already gone");
            Ok(Effect::None)
        }
    }

    // ========================================================================
    // Local -> cloud
    // ========================================================================

    async fn write_cloud(&self, item: &LocalItem) -> Result<Effect, SyncError> {
        let root = self.container.resolve_root().await?;
        let source = item.path.clone();
        let target = item.cloud_path_in(&root);

        let written = self
            .coordinator
            .coordinate(&[source.as_path(), target.as_path()], || async {
                let (data, modified) = match filesystem::read_with_mtime(&source).await {
                    Ok(read) => read,
                    Err(e) if e.is_not_found() => return Ok(false),
                    Err(e) => return Err(e),
                };
                filesystem::write_atomic(&target, &data, modified).await?;
                Ok(true)
            })
            .await?;

        if written {
            debug!(file = %item.identity, "Wrote cloud copy");
        } else {
            debug!(file = %item.identity, "Local source vanished, nothing to upload");
        }
        Ok(Effect::None)
    }

    async fn remove_cloud(&self, item: &LocalItem) -> Result<Effect, SyncError> {
        let root = self.container.resolve_root().await?;
        let target = item.cloud_path_in(&root);
        let trashed = self
            .container
            .trash_dir(&root)
            .join(item.identity.as_str());

        self.coordinator
            .coordinate(&[target.as_path(), trashed.as_path()], || async {
                if !filesystem::exists(&target).await {
                    debug!(file = %item.identity, "Cloud copy already gone");
                    return Ok(());
                }
                if filesystem::remove_if_exists(&trashed).await? {
                    debug!(file = %item.identity, "Removed stale trash entry");
                }
                filesystem::move_file(&target, &trashed).await?;
                debug!(file = %item.identity, "Moved cloud copy to trash");
                Ok::<(), SyncError>(())
            })
            .await?;

        Ok(Effect::None)
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    async fn resolve_version_conflict(&self, item: &CloudItem) -> Result<Effect, SyncError> {
        let root = self.container.resolve_root().await?;
        let current = item.path_in(&root);

        let versions = self.container.conflict_versions(item).await?;
        let Some(latest) = latest_version(&versions) else {
            debug!(file = %item.identity, "No versions in conflict");
            return Ok(Effect::None);
        };

        let copy = self
            .coordinator
            .coordinate(&[current.as_path()], || async {
                let (data, modified) = filesystem::read_with_mtime(&current)
                    .await
                    .map_err(|e| unavailable_if_missing(e, item))?;
                let (latest_data, _) = filesystem::read_with_mtime(&latest.path).await?;

                let copy = if data == latest_data {
                    debug!(file = %item.identity, "Current content is already the latest version");
                    None
                } else {
                    let copy = self.keep_copy(&current, None, &data, modified).await?;
                    self.container.replace_with_version(item, latest).await?;
                    Some(copy)
                };
                self.container.remove_other_versions(item).await?;
                Ok::<_, SyncError>(copy)
            })
            .await?;

        info!(
            file = %item.identity,
            copy = ?copy.as_deref().map(Path::display),
            versions = versions.len(),
            "Resolved version conflict"
        );
        Ok(Effect::LocalChanged)
    }

    async fn resolve_initial_sync_conflict(
        &self,
        local: &LocalItem,
        cloud: &CloudItem,
    ) -> Result<Effect, SyncError> {
        let root = self.container.resolve_root().await?;
        let source = cloud.path_in(&root);
        let target = local.path.clone();

        let outcome = self
            .coordinator
            .coordinate(&[source.as_path(), target.as_path()], || async {
                let (cloud_data, cloud_modified) = filesystem::read_with_mtime(&source)
                    .await
                    .map_err(|e| unavailable_if_missing(e, cloud))?;
                let local_copy = match filesystem::read_with_mtime(&target).await {
                    Ok(read) => Some(read),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                };

                let copy = match local_copy {
                    Some((data, _)) if data == cloud_data => return Ok(KeptBoth::AlreadyIdentical),
                    Some((data, modified)) => Some(
                        self.keep_copy(&target, Some(self.device_name.as_str()), &data, modified)
                            .await?,
                    ),
                    None => None,
                };
                filesystem::write_atomic(&target, &cloud_data, cloud_modified).await?;
                Ok(KeptBoth::Resolved(copy))
            })
            .await?;

        match outcome {
            KeptBoth::Resolved(copy) => {
                info!(
                    file = %local.identity,
                    copy = ?copy.as_deref().map(Path::display),
                    "Kept both copies of initial sync conflict"
                );
                Ok(Effect::LocalChanged)
            }
            KeptBoth::AlreadyIdentical => {
                debug!(file = %local.identity, "Copies already identical");
                Ok(Effect::None)
            }
        }
    }

    /// Saves `data` as a conflict copy of `original` and returns its path
    ///
    /// A sibling that already holds exactly `data` is reused, so running the
    /// same resolution again never adds a second copy.
    async fn keep_copy(
        &self,
        original: &Path,
        device_name: Option<&str>,
        data: &[u8],
        modified: DateTime<Utc>,
    ) -> Result<PathBuf, SyncError> {
        let hash = filesystem::hash_bytes(data);
        let mut after = original.to_path_buf();
        let mut device_name = device_name;

        for _ in 0..MAX_RENAME_ATTEMPTS {
            let candidate = copy_name(&after, device_name, &hash).await?;
            let slot = self
                .coordinator
                .coordinate(&[candidate.as_path()], || async {
                    let slot = inspect(&candidate, &hash).await?;
                    if slot == Slot::Free {
                        filesystem::write_atomic(&candidate, data, modified).await?;
                    }
                    Ok::<_, SyncError>(slot)
                })
                .await?;

            match slot {
                Slot::Free => {
                    debug!(copy = %candidate.display(), "Saved conflict copy");
                    return Ok(candidate);
                }
                Slot::SameContent => {
                    debug!(copy = %candidate.display(), "Conflict copy already saved");
                    return Ok(candidate);
                }
                Slot::Taken => {
                    debug!(candidate = %candidate.display(), "Conflict name claimed meanwhile");
                    after = candidate;
                    device_name = None;
                }
            }
        }
        Err(ConflictError::NamesExhausted {
            path: original.to_path_buf(),
            attempts: MAX_RENAME_ATTEMPTS,
        }
        .into())
    }
}

/// First name after `path` that is free or already holds `hash`
async fn copy_name(
    path: &Path,
    device_name: Option<&str>,
    hash: &ContentHash,
) -> Result<PathBuf, SyncError> {
    let path = path.to_path_buf();
    let device_name = device_name.map(str::to_owned);
    let hash = hash.clone();
    let owned = path.clone();
    let named = tokio::task::spawn_blocking(move || {
        generate_new_file_url(&owned, device_name.as_deref(), |candidate| {
            !matches!(
                inspect_blocking(candidate, &hash),
                Ok(Slot::Free | Slot::SameContent)
            )
        })
    })
    .await
    .map_err(|e| {
        SyncError::Other(format!(
            "naming a copy of {} did not complete: {e}",
            path.display()
        ))
    })?;
    Ok(named?)
}

async fn inspect(path: &Path, hash: &ContentHash) -> Result<Slot, SyncError> {
    let owned = path.to_path_buf();
    let hash = hash.clone();
    match tokio::task::spawn_blocking(move || inspect_blocking(&owned, &hash)).await {
        Ok(result) => result.map_err(|e| SyncError::io(path, &e)),
        Err(e) => Err(SyncError::Other(format!(
            "inspecting {} did not complete: {e}",
            path.display()
        ))),
    }
}

fn inspect_blocking(path: &Path, hash: &ContentHash) -> std::io::Result<Slot> {
    match filesystem::hash_file_blocking(path) {
        Ok(existing) if &existing == hash => Ok(Slot::SameContent),
        Ok(_) => Ok(Slot::Taken),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Slot::Free),
        Err(e) => Err(e),
    }
}

fn unavailable_if_missing(err: SyncError, item: &CloudItem) -> SyncError {
    if err.is_not_found() {
        warn!(file = %item.identity, "Cloud item vanished before it could be read");
        SyncError::FileUnavailable(item.identity.to_string())
    } else {
        err
    }
}
