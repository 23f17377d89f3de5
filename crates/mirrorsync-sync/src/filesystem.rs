//! Filesystem helpers used by the executor and the directory adapters
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content goes to a hidden temp file in the target
//!   directory, gets its modification time set, and is renamed over the
//!   target. Readers never observe a partial file.
//! - **Exact timestamps**: the modification time written is the one the
//!   caller passes, to the nanosecond, because later diffs compare it.
//! - **Blocking I/O** runs on `spawn_blocking` so the runtime stays free.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use mirrorsync_core::domain::{ContentHash, SyncError};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Prefix of temporary files created by [`write_atomic`]
pub const TEMP_PREFIX: &str = ".mirrorsync-";

/// Reads a file together with its modification time
#[instrument(level = "debug", fields(path = %path.display()))]
pub async fn read_with_mtime(path: &Path) -> Result<(Vec<u8>, DateTime<Utc>), SyncError> {
    let owned = path.to_path_buf();
    run_blocking(path, move || {
        let data = std::fs::read(&owned)?;
        let modified = std::fs::metadata(&owned)?.modified()?;
        Ok((data, DateTime::<Utc>::from(modified)))
    })
    .await
}

/// Writes `data` to `target` atomically and stamps it with `modified`
///
/// Parent directories are created as needed. Writing the same bytes and
/// time twice leaves the file exactly as after the first write.
#[instrument(level = "debug", skip(data), fields(path = %target.display(), bytes = data.len()))]
pub async fn write_atomic(
    target: &Path,
    data: &[u8],
    modified: DateTime<Utc>,
) -> Result<(), SyncError> {
    let target_owned = target.to_path_buf();
    let data = data.to_vec();
    run_blocking(target, move || {
        let parent = target_owned
            .parent()
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
        std::fs::create_dir_all(parent)?;

        let tmp_path = temp_path_for(&target_owned);
        let written = (|| {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            file.set_modified(SystemTime::from(modified))?;
            drop(file);
            std::fs::rename(&tmp_path, &target_owned)
        })();
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        written
    })
    .await?;
    debug!("write complete");
    Ok(())
}

/// Copies `source` to `target` keeping the source's modification time
pub async fn copy_preserving(source: &Path, target: &Path) -> Result<(), SyncError> {
    let (data, modified) = read_with_mtime(source).await?;
    write_atomic(target, &data, modified).await
}

/// Removes a file, reporting whether there was anything to remove
pub async fn remove_if_exists(path: &Path) -> Result<bool, SyncError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::io(path, &e)),
    }
}

/// Moves `path` to `target`, creating the target's directory
pub async fn move_file(path: &Path, target: &Path) -> Result<(), SyncError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, &e))?;
    }
    tokio::fs::rename(path, target)
        .await
        .map_err(|e| SyncError::io(path, &e))
}

/// Returns true if a regular file or directory exists at `path`
pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Hex-encoded SHA-256 of a byte slice
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    to_content_hash(&Sha256::digest(data))
}

/// Hex-encoded SHA-256 of a file, read synchronously
pub fn hash_file_blocking(path: &Path) -> std::io::Result<ContentHash> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(to_content_hash(&hasher.finalize()))
}

fn to_content_hash(digest: &[u8]) -> ContentHash {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(digest);
    ContentHash::from_digest(bytes)
}

/// Modification time of a file's metadata as UTC
pub fn mtime(metadata: &std::fs::Metadata) -> std::io::Result<DateTime<Utc>> {
    metadata.modified().map(DateTime::<Utc>::from)
}

/// Returns true for names this module uses for in-progress writes
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{TEMP_PREFIX}{name}.{}.tmp", Uuid::new_v4().simple()))
}

async fn run_blocking<T, F>(path: &Path, f: F) -> Result<T, SyncError>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| SyncError::io(path, &e)),
        Err(join) => Err(SyncError::Other(format!(
            "file operation on {} did not complete: {join}",
            path.display()
        ))),
    }
}

// ============================================================================
// Unit tests
// ============================================================================
