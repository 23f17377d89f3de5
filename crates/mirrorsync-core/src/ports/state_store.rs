//! Durable sync state port
//!
//! The only state that outlives a sync session is whether the first-ever
//! synchronization has finished. Everything else is rebuilt from a fresh
//! full gather on every start.

use async_trait::async_trait;

/// Persistent storage for the initial-sync flag
#[async_trait]
pub trait ISyncStateStore: Send + Sync {
    /// Returns true once the initial synchronization has been recorded
    ///
    /// A store that cannot be read reports `false`.
    async fn initial_sync_finished(&self) -> bool;

    /// Records that the initial synchronization finished
    ///
    /// The flag never reverts once set.
    async fn mark_initial_sync_finished(&self) -> anyhow::Result<()>;
}
