//! mirrorsync Sync - Two-way mirroring of a local directory and a cloud container
//!
//! Provides:
//! - Reconciliation of local and cloud listings into actions
//! - Idempotent, coordinated execution of those actions
//! - A lifecycle-managed orchestrator with observer fan-out
//! - Directory-backed monitors and cloud container
//!
//! ## Modules
//!
//! - [`reconciler`] - Listing diffing and the initial-sync state machine
//! - [`executor`] - Action execution against both directories
//! - [`orchestrator`] - Start/stop/pause/resume and batch dispatch
//! - [`watcher`] - `notify`-backed directory monitors
//! - [`filesystem`] - Atomic writes with exact timestamps, hashing

pub mod container;
pub mod coordinator;
pub mod executor;
pub mod filesystem;
pub mod observers;
pub mod orchestrator;
pub mod reconciler;
pub mod scanner;
pub mod state_store;
pub mod tracker;
pub mod watcher;

pub use container::MirrorContainer;
pub use coordinator::FileCoordinator;
pub use executor::{ActionExecutor, Effect};
pub use observers::{ObserverRegistry, SubscriptionId, SyncObserver};
pub use orchestrator::{LifecycleState, OrchestratorSettings, SyncComponents, SyncOrchestrator};
pub use reconciler::{Reconciler, SyncState};
pub use scanner::{CloudSource, ListingSource, LocalSource};
pub use state_store::JsonSyncStateStore;
pub use tracker::ListingTracker;
pub use watcher::{CloudDirectoryMonitor, DirectoryMonitor, LocalDirectoryMonitor};
