//! Observer fan-out for sync status
//!
//! External components subscribe to changes of the current error and of the
//! busy flag. Subscriptions hold observers weakly: dropping the last strong
//! reference unsubscribes implicitly, and dead entries are pruned the next
//! time observers are notified.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mirrorsync_core::domain::SyncError;
use tracing::trace;

/// Receiver of sync status changes
///
/// Both callbacks are invoked once right after subscribing, with the
/// current state, and afterwards on every change.
pub trait SyncObserver: Send + Sync {
    /// The current sync error was replaced or cleared
    fn on_sync_error_changed(&self, _error: Option<&SyncError>) {}

    /// Synchronization started or stopped processing a batch
    fn on_sync_busy_changed(&self, _busy: bool) {}
}

/// Handle returned by [`ObserverRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Shared {
    observers: BTreeMap<SubscriptionId, Weak<dyn SyncObserver>>,
    error: Option<SyncError>,
    busy: bool,
}

/// Weakly-held set of [`SyncObserver`]s plus the state they observe
#[derive(Default)]
pub struct ObserverRegistry {
    shared: Mutex<Shared>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` and notifies it of the current state
    pub fn subscribe(&self, observer: &Arc<dyn SyncObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (error, busy) = {
            let mut shared = self.lock();
            shared.observers.insert(id, Arc::downgrade(observer));
            (shared.error.clone(), shared.busy)
        };
        observer.on_sync_error_changed(error.as_ref());
        observer.on_sync_busy_changed(busy);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().observers.remove(&id);
    }

    /// Replaces the current error, notifying observers if it changed
    pub fn set_error(&self, error: Option<SyncError>) {
        let observers = {
            let mut shared = self.lock();
            if shared.error == error {
                return;
            }
            shared.error = error.clone();
            live_observers(&mut shared)
        };
        for observer in observers {
            observer.on_sync_error_changed(error.as_ref());
        }
    }

    /// Sets the busy flag, notifying observers if it changed
    pub fn set_busy(&self, busy: bool) {
        let observers = {
            let mut shared = self.lock();
            if shared.busy == busy {
                return;
            }
            shared.busy = busy;
            live_observers(&mut shared)
        };
        for observer in observers {
            observer.on_sync_busy_changed(busy);
        }
    }

    pub fn error(&self) -> Option<SyncError> {
        self.lock().error.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// Number of registered observers still alive
    pub fn len(&self) -> usize {
        self.lock()
            .observers
            .values()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Upgrades every observer, dropping the dead ones from the table
fn live_observers(shared: &mut Shared) -> Vec<Arc<dyn SyncObserver>> {
    let mut live = Vec::with_capacity(shared.observers.len());
    shared.observers.retain(|id, weak| match weak.upgrade() {
        Some(observer) => {
            live.push(observer);
            true
        }
        None => {
            trace!(id = id.0, "Pruning dead observer");
            false
        }
    });
    live
}
