//! JSON-file implementation of the durable sync state
//!
//! Persists a single document:
//!
//! ```json
//! { "initial_synchronization_finished": true }
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use mirrorsync_core::ports::ISyncStateStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    initial_synchronization_finished: bool,
}

/// Stores the initial-sync flag in a JSON file
#[derive(Debug, Clone)]
pub struct JsonSyncStateStore {
    path: PathBuf,
}

impl JsonSyncStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> anyhow::Result<StateDocument> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read sync state: {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse sync state: {}", self.path.display()))
    }
}

#[async_trait]
impl ISyncStateStore for JsonSyncStateStore {
    async fn initial_sync_finished(&self) -> bool {
        match self.read().await {
            Ok(doc) => doc.initial_synchronization_finished,
            Err(e) => {
                if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
                    warn!(path = %self.path.display(), error = %e, "Unreadable sync state, assuming first sync");
                } else {
                    debug!(path = %self.path.display(), "No sync state yet");
                }
                false
            }
        }
    }

    async fn mark_initial_sync_finished(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let doc = StateDocument {
            initial_synchronization_finished: true,
        };
        let json = serde_json::to_string_pretty(&doc)?;

        let tmp_path = {
            let mut p = self.path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };
        tokio::fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Recorded initial synchronization");
        Ok(())
    }
}
