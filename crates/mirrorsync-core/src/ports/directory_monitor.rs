//! Directory monitor port (driving/primary port)
//!
//! Monitors observe one side of the mirror (the local directory or the
//! cloud container) and push listings to a delegate. Each monitor emits a
//! full gather once per start and incremental deltas afterwards.
//!
//! ## Design Notes
//!
//! - `IMonitorDelegate` is synchronous because monitors deliver from their
//!   own notification thread; implementations hand the event off to a queue.
//! - Errors a monitor hits while observing are delivered as events, not as
//!   return values, so they reach the reconciler in arrival order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{CloudListing, LocalListing, SyncError};

// ============================================================================
// MonitorEvent
// ============================================================================

/// An observation delivered by a directory monitor
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// First complete snapshot of the local directory
    LocalGatherComplete(LocalListing),
    /// Changes to the local directory since the previous listing
    LocalUpdate(LocalListing),
    /// First complete snapshot of the cloud container
    CloudGatherComplete(CloudListing),
    /// Changes to the cloud container since the previous listing
    CloudUpdate(CloudListing),
    /// The local monitor failed while observing
    LocalError(SyncError),
    /// The cloud monitor failed while observing
    CloudError(SyncError),
}

impl MonitorEvent {
    /// Wraps a local listing in the event matching its kind
    pub fn local(listing: LocalListing) -> Self {
        if listing.is_full_gather() {
            MonitorEvent::LocalGatherComplete(listing)
        } else {
            MonitorEvent::LocalUpdate(listing)
        }
    }

    /// Wraps a cloud listing in the event matching its kind
    pub fn cloud(listing: CloudListing) -> Self {
        if listing.is_full_gather() {
            MonitorEvent::CloudGatherComplete(listing)
        } else {
            MonitorEvent::CloudUpdate(listing)
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::LocalGatherComplete(_) => "local_gather_complete",
            MonitorEvent::LocalUpdate(_) => "local_update",
            MonitorEvent::CloudGatherComplete(_) => "cloud_gather_complete",
            MonitorEvent::CloudUpdate(_) => "cloud_update",
            MonitorEvent::LocalError(_) => "local_error",
            MonitorEvent::CloudError(_) => "cloud_error",
        }
    }
}

// ============================================================================
// IMonitorDelegate
// ============================================================================

/// Receiver of monitor events
///
/// ## Threading
///
/// Called from the monitor's own task or thread, so implementations must be
/// thread-safe and must not block.
pub trait IMonitorDelegate: Send + Sync {
    fn on_event(&self, event: MonitorEvent);
}

// ============================================================================
// IDirectoryMonitor
// ============================================================================

/// Observes one side of the mirror
#[async_trait]
pub trait IDirectoryMonitor: Send + Sync {
    /// Starts observing and delivers events to `delegate`
    ///
    /// The first event after a successful start is a full gather.
    ///
    /// # Errors
    /// Returns an environment error if the directory cannot be opened
    async fn start(&self, delegate: Arc<dyn IMonitorDelegate>) -> Result<(), SyncError>;

    /// Stops observing and forgets the delegate
    async fn stop(&self);

    /// Suspends delivery without losing track of changes
    async fn pause(&self);

    /// Resumes delivery, reporting whatever changed while paused
    async fn resume(&self);

    /// Returns true between a successful `start` and `stop`
    fn is_started(&self) -> bool;
}
