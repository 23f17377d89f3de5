//! Directory monitoring
//!
//! A [`DirectoryMonitor`] observes one side of the mirror and reports it to
//! an [`IMonitorDelegate`]: a full gather right after start, then an
//! incremental update whenever a rescan finds something changed.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue ──→ dirty signal ──┐
//!                                     ├──→ debounce ──→ scan ──→ ListingTracker ──→ delegate
//! poll interval ──────────────────────┘
//! ```
//!
//! OS notifications only mark the directory dirty; the scan is what decides
//! what changed. The poll interval covers changes the OS does not report
//! (network filesystems, provider-side writes). If the OS watcher cannot be
//! created the monitor keeps working on polling alone.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirrorsync_core::domain::SyncError;
use mirrorsync_core::ports::{IDirectoryMonitor, IMonitorDelegate};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::scanner::{CloudSource, ListingSource, LocalSource};
use crate::tracker::ListingTracker;

/// Monitor of the local directory
pub type LocalDirectoryMonitor = DirectoryMonitor<LocalSource>;

/// Monitor of the cloud container
pub type CloudDirectoryMonitor = DirectoryMonitor<CloudSource>;

struct MonitorSession {
    cancel: CancellationToken,
    paused_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Watches a directory and reports listings of it
pub struct DirectoryMonitor<S: ListingSource> {
    source: Arc<S>,
    poll_interval: Duration,
    debounce: Duration,
    session: Mutex<Option<MonitorSession>>,
    started: AtomicBool,
}

impl<S: ListingSource> DirectoryMonitor<S> {
    /// Creates a stopped monitor
    ///
    /// # Arguments
    /// * `source` - What to scan
    /// * `poll_interval` - Rescan period independent of OS notifications
    /// * `debounce` - Quiet time awaited after a notification before scanning
    pub fn new(source: S, poll_interval: Duration, debounce: Duration) -> Self {
        Self {
            source: Arc::new(source),
            poll_interval,
            debounce,
            session: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        self.source.root()
    }
}

#[async_trait]
impl<S: ListingSource> IDirectoryMonitor for DirectoryMonitor<S> {
    #[instrument(skip(self, delegate), fields(root = %self.source.root().display()))]
    async fn start(&self, delegate: Arc<dyn IMonitorDelegate>) -> Result<(), SyncError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            debug!("Monitor already started");
            return Ok(());
        }

        let source = self.source.clone();
        tokio::task::spawn_blocking(move || source.check_root())
            .await
            .map_err(|e| SyncError::Other(format!("root check did not complete: {e}")))??;

        let (dirty_tx, dirty_rx) = mpsc::channel::<()>(1);
        let os_watcher = match create_os_watcher(self.source.root(), dirty_tx) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "OS notifications unavailable, polling only");
                None
            }
        };

        let cancel = CancellationToken::new();
        let (paused_tx, paused_rx) = watch::channel(false);
        let task = tokio::spawn(run_monitor(
            self.source.clone(),
            delegate,
            MonitorLoop {
                cancel: cancel.clone(),
                paused_rx,
                dirty_rx,
                poll_interval: self.poll_interval,
                debounce: self.debounce,
            },
            os_watcher,
        ));

        *session = Some(MonitorSession {
            cancel,
            paused_tx,
            task,
        });
        self.started.store(true, Ordering::SeqCst);
        info!("Directory monitor started");
        Ok(())
    }

    async fn stop(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        session.cancel.cancel();
        if let Err(e) = session.task.await {
            warn!(error = %e, "Monitor task ended abnormally");
        }
        self.started.store(false, Ordering::SeqCst);
        info!(root = %self.source.root().display(), "Directory monitor stopped");
    }

    async fn pause(&self) {
        if let Some(session) = self.session.lock().await.as_ref() {
            session.paused_tx.send_replace(true);
            debug!(root = %self.source.root().display(), "Directory monitor paused");
        }
    }

    async fn resume(&self) {
        if let Some(session) = self.session.lock().await.as_ref() {
            session.paused_tx.send_replace(false);
            debug!(root = %self.source.root().display(), "Directory monitor resumed");
        }
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Monitor loop
// ============================================================================

struct MonitorLoop {
    cancel: CancellationToken,
    paused_rx: watch::Receiver<bool>,
    dirty_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
    debounce: Duration,
}

async fn run_monitor<S: ListingSource>(
    source: Arc<S>,
    delegate: Arc<dyn IMonitorDelegate>,
    mut ctl: MonitorLoop,
    _os_watcher: Option<RecommendedWatcher>,
) {
    let mut tracker = ListingTracker::<S::Item>::new();
    scan_and_report(&source, &mut tracker, delegate.as_ref()).await;

    let mut ticker = tokio::time::interval(ctl.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let paused = *ctl.paused_rx.borrow();
        tokio::select! {
            biased;

            _ = ctl.cancel.cancelled() => break,

            changed = ctl.paused_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if !*ctl.paused_rx.borrow_and_update() {
                    scan_and_report(&source, &mut tracker, delegate.as_ref()).await;
                }
            }

            Some(()) = ctl.dirty_rx.recv() => {
                if paused {
                    continue;
                }
                tokio::select! {
                    _ = ctl.cancel.cancelled() => break,
                    _ = tokio::time::sleep(ctl.debounce) => {}
                }
                while ctl.dirty_rx.try_recv().is_ok() {}
                scan_and_report(&source, &mut tracker, delegate.as_ref()).await;
            }

            _ = ticker.tick() => {
                if !paused {
                    scan_and_report(&source, &mut tracker, delegate.as_ref()).await;
                }
            }
        }
    }
    debug!(root = %source.root().display(), "Monitor loop exited");
}

async fn scan_and_report<S: ListingSource>(
    source: &Arc<S>,
    tracker: &mut ListingTracker<S::Item>,
    delegate: &dyn IMonitorDelegate,
) {
    let scanning = source.clone();
    let scanned = tokio::task::spawn_blocking(move || scanning.scan())
        .await
        .unwrap_or_else(|e| Err(SyncError::Other(format!("scan did not complete: {e}"))));

    match scanned {
        Ok(items) => {
            if let Some(listing) = tracker.observe(items) {
                debug!(
                    root = %source.root().display(),
                    generation = %listing.generation(),
                    full = listing.is_full_gather(),
                    items = listing.len(),
                    removed = listing.removed().len(),
                    "Reporting listing"
                );
                delegate.on_event(S::listing_event(listing));
            }
        }
        Err(e) => {
            warn!(root = %source.root().display(), error = %e, "Scan failed");
            delegate.on_event(S::error_event(e));
        }
    }
}

/// OS watcher that marks the directory dirty on any non-access event
fn create_os_watcher(root: &Path, dirty_tx: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                // A full channel already holds a pending signal
                let _ = dirty_tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "File watcher error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}
