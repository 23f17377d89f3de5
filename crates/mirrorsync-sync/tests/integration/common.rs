//! Shared test helpers for sync engine integration tests
//!
//! Provides a two-directory mirror fixture, scripted directory monitors, a
//! bookmarks engine double and a recording sync observer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorsync_core::domain::{
    Action, CloudItem, CloudListing, ContentListing, DownloadStatus, FileIdentity, Generation,
    LocalItem, LocalListing, SyncError,
};
use mirrorsync_core::ports::{
    IBookmarksEngine, IBookmarksObserver, IDirectoryMonitor, IMonitorDelegate, MonitorEvent,
};
use mirrorsync_sync::scanner::{CloudSource, ListingSource, LocalSource};
use mirrorsync_sync::{
    ActionExecutor, JsonSyncStateStore, ListingTracker, MirrorContainer, Reconciler, SyncObserver,
};
use tempfile::TempDir;

pub const DEVICE: &str = "laptop";
pub const EXTENSION: &str = "kml";

// ============================================================================
// Directories
// ============================================================================

/// A local directory, a cloud container and a state file under one temp dir
pub struct Dirs {
    _dir: TempDir,
    pub local: PathBuf,
    pub cloud: PathBuf,
    pub state: PathBuf,
}

impl Dirs {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local");
        let cloud = dir.path().join("cloud");
        let state = dir.path().join("state.json");
        std::fs::create_dir_all(&local).unwrap();
        std::fs::create_dir_all(&cloud).unwrap();
        Self {
            _dir: dir,
            local,
            cloud,
            state,
        }
    }

    /// Records a finished initial synchronization in the state file
    pub fn mark_initial_sync_finished(&self) {
        std::fs::write(&self.state, r#"{"initial_synchronization_finished": true}"#).unwrap();
    }

    pub fn executor(&self) -> ActionExecutor {
        ActionExecutor::new(
            &self.local,
            Arc::new(MirrorContainer::new(&self.cloud)),
            Arc::new(JsonSyncStateStore::new(&self.state)),
            DEVICE,
        )
    }

    pub fn state_store(&self) -> JsonSyncStateStore {
        JsonSyncStateStore::new(&self.state)
    }
}

/// Writes `data` to `path`, creating parents
pub fn write(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
}

/// Writes `data` to `path` and sets its modification time to `secs` after the epoch
pub fn write_at(path: &Path, data: &[u8], secs: u64) {
    write(path, data);
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

pub fn mtime(path: &Path) -> DateTime<Utc> {
    DateTime::<Utc>::from(std::fs::metadata(path).unwrap().modified().unwrap())
}

pub fn id(name: &str) -> FileIdentity {
    FileIdentity::new(name).unwrap()
}

// ============================================================================
// Mirror: scanners + reconciler + executor without monitors
// ============================================================================

/// Runs reconciliation rounds synchronously over a [`Dirs`] fixture
pub struct Mirror {
    pub dirs: Dirs,
    local_source: LocalSource,
    cloud_source: CloudSource,
    local_tracker: ListingTracker<LocalItem>,
    cloud_tracker: ListingTracker<CloudItem>,
    pub reconciler: Reconciler,
    executor: ActionExecutor,
}

impl Mirror {
    pub fn new(dirs: Dirs, initial_sync_completed: bool) -> Self {
        Self {
            local_source: LocalSource::new(&dirs.local, EXTENSION),
            cloud_source: CloudSource::new(&dirs.cloud, EXTENSION),
            local_tracker: ListingTracker::new(),
            cloud_tracker: ListingTracker::new(),
            reconciler: Reconciler::new(initial_sync_completed),
            executor: dirs.executor(),
            dirs,
        }
    }

    /// Scans both sides, resolves what changed and executes the actions
    ///
    /// Returns the names of the executed actions, in execution order.
    pub async fn round(&mut self) -> Vec<String> {
        let mut actions: Vec<Action> = Vec::new();

        let local = self.local_source.scan().unwrap();
        if let Some(listing) = self.local_tracker.observe(local) {
            actions.extend(self.reconciler.resolve(LocalSource::listing_event(listing)));
        }
        let cloud = self.cloud_source.scan().unwrap();
        if let Some(listing) = self.cloud_tracker.observe(cloud) {
            actions.extend(self.reconciler.resolve(CloudSource::listing_event(listing)));
        }

        let mut executed = Vec::new();
        for action in actions {
            self.executor.execute(&action).await.unwrap();
            executed.push(action.to_string());
        }
        executed
    }
}

// ============================================================================
// Scripted monitor
// ============================================================================

/// Directory monitor whose events are pushed by the test
#[derive(Default)]
pub struct ScriptedMonitor {
    delegate: Mutex<Option<Arc<dyn IMonitorDelegate>>>,
    fail_with: Mutex<Option<SyncError>>,
    started: AtomicBool,
    paused: AtomicBool,
    starts: AtomicUsize,
}

impl ScriptedMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A monitor whose next start fails with `err`
    pub fn failing(err: SyncError) -> Arc<Self> {
        let monitor = Self::default();
        *monitor.fail_with.lock().unwrap() = Some(err);
        Arc::new(monitor)
    }

    /// Delivers `event` to the delegate registered at start
    pub fn emit(&self, event: MonitorEvent) {
        let delegate = self
            .delegate
            .lock()
            .unwrap()
            .clone()
            .expect("monitor not started");
        delegate.on_event(event);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IDirectoryMonitor for ScriptedMonitor {
    async fn start(&self, delegate: Arc<dyn IMonitorDelegate>) -> Result<(), SyncError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        *self.delegate.lock().unwrap() = Some(delegate);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.delegate.lock().unwrap().take();
        self.started.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Bookmarks engine double
// ============================================================================

/// Counts reloads and, when responsive, confirms them right away
pub struct FakeBookmarks {
    observers: Mutex<Vec<Arc<dyn IBookmarksObserver>>>,
    loads: AtomicUsize,
    responsive: bool,
}

impl FakeBookmarks {
    pub fn responsive() -> Arc<Self> {
        Arc::new(Self {
            observers: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            responsive: true,
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            observers: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            responsive: false,
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }
}

impl IBookmarksEngine for FakeBookmarks {
    fn load_bookmarks(&self) {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.responsive {
            return;
        }
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            observer.on_bookmarks_load_finished();
        }
    }

    fn add_observer(&self, observer: Arc<dyn IBookmarksObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    fn remove_observer(&self, observer: &Arc<dyn IBookmarksObserver>) {
        self.observers
            .lock()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }
}

// ============================================================================
// Recording observer
// ============================================================================

#[derive(Default)]
pub struct Recorder {
    pub busy: Mutex<Vec<bool>>,
    pub errors: Mutex<Vec<Option<SyncError>>>,
}

impl SyncObserver for Recorder {
    fn on_sync_error_changed(&self, error: Option<&SyncError>) {
        self.errors.lock().unwrap().push(error.cloned());
    }

    fn on_sync_busy_changed(&self, busy: bool) {
        self.busy.lock().unwrap().push(busy);
    }
}

// ============================================================================
// Listings and polling
// ============================================================================

pub fn local_gather(generation: u64, items: Vec<LocalItem>) -> MonitorEvent {
    let listing: LocalListing = ContentListing::full(Generation::new(generation), items);
    MonitorEvent::local(listing)
}

pub fn cloud_gather(generation: u64, items: Vec<CloudItem>) -> MonitorEvent {
    let listing: CloudListing = ContentListing::full(Generation::new(generation), items);
    MonitorEvent::cloud(listing)
}

/// Describes a materialized file in the cloud container
pub fn cloud_item(cloud_root: &Path, name: &str) -> CloudItem {
    CloudItem {
        identity: id(name),
        relative_path: PathBuf::from(name),
        last_modified: mtime(&cloud_root.join(name)),
        download_status: DownloadStatus::Current,
        has_unresolved_conflicts: false,
        content_hash: None,
    }
}

/// Polls `condition` every 10ms for up to 2s
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
