//! Orchestrator lifecycle and batch handling
//!
//! Monitors are scripted so each test controls exactly which listings and
//! errors reach the engine; the executor works on real directories.

use std::sync::Arc;
use std::time::Duration;

use mirrorsync_core::domain::{ContentListing, Generation, LocalListing, SyncError};
use mirrorsync_core::ports::{IDirectoryMonitor, ISyncStateStore, MonitorEvent};
use mirrorsync_sync::{
    LifecycleState, OrchestratorSettings, SyncComponents, SyncObserver, SyncOrchestrator,
};

use crate::common::{self, Dirs, FakeBookmarks, Recorder, ScriptedMonitor};

struct Harness {
    dirs: Dirs,
    local: Arc<ScriptedMonitor>,
    cloud: Arc<ScriptedMonitor>,
    bookmarks: Arc<FakeBookmarks>,
    orchestrator: SyncOrchestrator,
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        enabled: true,
        max_concurrent_actions: 4,
        reload_timeout: Duration::from_millis(200),
        background_grace: Duration::from_millis(500),
    }
}

fn harness_with(
    dirs: Dirs,
    local: Arc<ScriptedMonitor>,
    cloud: Arc<ScriptedMonitor>,
    bookmarks: Arc<FakeBookmarks>,
) -> Harness {
    let orchestrator = SyncOrchestrator::new(
        SyncComponents {
            local_monitor: local.clone(),
            cloud_monitor: cloud.clone(),
            executor: Arc::new(dirs.executor()),
            bookmarks: bookmarks.clone(),
            state_store: Arc::new(dirs.state_store()),
        },
        settings(),
    );
    Harness {
        dirs,
        local,
        cloud,
        bookmarks,
        orchestrator,
    }
}

/// Harness past its initial synchronization
fn harness() -> Harness {
    let dirs = Dirs::new();
    dirs.mark_initial_sync_finished();
    harness_with(
        dirs,
        ScriptedMonitor::new(),
        ScriptedMonitor::new(),
        FakeBookmarks::responsive(),
    )
}

impl Harness {
    /// Puts `a.kml` in the cloud and reports both sides, calling for a download
    fn emit_cloud_only_file(&self) {
        common::write_at(&self.dirs.cloud.join("a.kml"), b"alpha", 1_000);
        self.local.emit(common::local_gather(1, Vec::new()));
        self.cloud.emit(common::cloud_gather(
            1,
            vec![common::cloud_item(&self.dirs.cloud, "a.kml")],
        ));
    }
}

#[tokio::test]
async fn test_start_and_stop() {
    let h = harness();
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Stopped);

    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
    assert!(h.local.is_started());
    assert!(h.cloud.is_started());
    assert_eq!(h.bookmarks.observer_count(), 1);

    // Starting twice is a no-op
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.local.starts(), 1);

    h.orchestrator.stop().await;
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Stopped);
    assert!(!h.local.is_started());
    assert!(!h.cloud.is_started());
    assert_eq!(h.bookmarks.observer_count(), 0);
    assert!(!h.orchestrator.is_busy());
}

#[tokio::test]
async fn test_start_failure_stops_and_reports() {
    let dirs = Dirs::new();
    let missing = dirs.local.join("missing");
    let h = harness_with(
        dirs,
        ScriptedMonitor::failing(SyncError::LocalDirectoryUnavailable(missing.clone())),
        ScriptedMonitor::new(),
        FakeBookmarks::responsive(),
    );

    let err = h.orchestrator.start().await.unwrap_err();
    assert_eq!(err, SyncError::LocalDirectoryUnavailable(missing));
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Stopped);
    assert_eq!(h.orchestrator.current_error(), Some(err));
    assert!(!h.cloud.is_started());
    assert_eq!(h.bookmarks.observer_count(), 0);

    // The scripted failure only happens once
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
}

#[tokio::test]
async fn test_cloud_file_is_copied_and_bookmarks_reloaded() {
    let h = harness();
    let recorder = Arc::new(Recorder::default());
    let observer: Arc<dyn SyncObserver> = recorder.clone();
    let _subscription = h.orchestrator.subscribe(&observer);

    h.orchestrator.start().await.unwrap();
    h.emit_cloud_only_file();

    let target = h.dirs.local.join("a.kml");
    assert!(common::eventually(|| target.exists()).await);
    assert!(common::eventually(|| h.bookmarks.loads() == 1).await);
    assert_eq!(common::read(&target), b"alpha");

    assert!(common::eventually(|| !h.orchestrator.is_busy()).await);
    assert_eq!(*recorder.busy.lock().unwrap(), vec![false, true, false]);
    assert_eq!(h.orchestrator.current_error(), None);
}

#[tokio::test]
async fn test_transient_error_is_reported_and_cleared() {
    let h = harness();
    h.orchestrator.start().await.unwrap();

    h.cloud
        .emit(MonitorEvent::CloudError(SyncError::CloudServiceUnreachable));
    assert!(common::eventually(|| {
        h.orchestrator.current_error() == Some(SyncError::CloudServiceUnreachable)
    })
    .await);
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);

    // A pass with nothing to do clears the error
    h.local.emit(common::local_gather(1, Vec::new()));
    assert!(common::eventually(|| h.orchestrator.current_error().is_none()).await);
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
}

#[tokio::test]
async fn test_failed_action_is_issued_again_on_next_pass() {
    let h = harness();
    h.orchestrator.start().await.unwrap();

    let source = h.dirs.cloud.join("a.kml");
    common::write_at(&source, b"alpha", 1_000);
    let item = common::cloud_item(&h.dirs.cloud, "a.kml");
    let parked = h.dirs.cloud.join("parked");
    std::fs::rename(&source, &parked).unwrap();

    h.local.emit(common::local_gather(1, Vec::new()));
    h.cloud.emit(common::cloud_gather(1, vec![item]));
    assert!(common::eventually(|| {
        h.orchestrator.current_error() == Some(SyncError::FileUnavailable("a.kml".into()))
    })
    .await);
    assert!(!h.dirs.local.join("a.kml").exists());

    // The file is back; an unrelated local change triggers the next pass
    std::fs::rename(&parked, &source).unwrap();
    let unrelated: LocalListing =
        ContentListing::update(Generation::new(2), Vec::new(), [common::id("z.kml")]);
    h.local.emit(MonitorEvent::local(unrelated));

    let target = h.dirs.local.join("a.kml");
    assert!(common::eventually(|| target.exists()).await);
    assert_eq!(common::read(&target), b"alpha");
    assert_eq!(common::mtime(&target), common::mtime(&source));
}

#[tokio::test]
async fn test_fatal_error_stops_synchronization() {
    let h = harness();
    h.orchestrator.start().await.unwrap();

    let err = SyncError::LocalDirectoryUnavailable(h.dirs.local.clone());
    h.local.emit(MonitorEvent::LocalError(err.clone()));

    assert!(
        common::eventually(|| h.orchestrator.lifecycle() == LifecycleState::Stopped).await
    );
    assert_eq!(h.orchestrator.current_error(), Some(err));
    assert!(!h.local.is_started());
    assert!(!h.cloud.is_started());
}

#[tokio::test]
async fn test_unclassified_error_is_only_logged() {
    let h = harness();
    h.orchestrator.start().await.unwrap();

    h.cloud
        .emit(MonitorEvent::CloudError(SyncError::Other("odd".to_string())));
    h.local.emit(common::local_gather(1, Vec::new()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.orchestrator.current_error(), None);
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
}

#[tokio::test]
async fn test_stop_clears_error() {
    let h = harness();
    h.orchestrator.start().await.unwrap();
    h.cloud
        .emit(MonitorEvent::CloudError(SyncError::CloudServiceUnreachable));
    assert!(common::eventually(|| h.orchestrator.current_error().is_some()).await);

    h.orchestrator.stop().await;
    assert_eq!(h.orchestrator.current_error(), None);
}

#[tokio::test]
async fn test_silent_bookmarks_engine_times_out() {
    let dirs = Dirs::new();
    dirs.mark_initial_sync_finished();
    let h = harness_with(
        dirs,
        ScriptedMonitor::new(),
        ScriptedMonitor::new(),
        FakeBookmarks::silent(),
    );
    h.orchestrator.start().await.unwrap();
    h.emit_cloud_only_file();

    assert!(common::eventually(|| h.bookmarks.loads() == 1).await);
    assert!(common::eventually(|| matches!(
        h.orchestrator.current_error(),
        Some(SyncError::ReloadTimedOut(_))
    ))
    .await);
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
}

#[tokio::test]
async fn test_pause_holds_events_until_resume() {
    let h = harness();
    h.orchestrator.start().await.unwrap();
    h.orchestrator.pause().await;
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Paused);
    assert!(h.local.is_paused());
    assert!(h.cloud.is_paused());

    h.emit_cloud_only_file();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let target = h.dirs.local.join("a.kml");
    assert!(!target.exists());

    h.orchestrator.resume().await;
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
    assert!(!h.local.is_paused());
    assert!(common::eventually(|| target.exists()).await);
}

#[tokio::test]
async fn test_pause_and_resume_ignored_in_wrong_state() {
    let h = harness();
    h.orchestrator.pause().await;
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Stopped);

    h.orchestrator.start().await.unwrap();
    h.orchestrator.resume().await;
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
}

#[tokio::test]
async fn test_settings_toggle_and_app_state() {
    let h = harness();
    assert!(h.orchestrator.is_enabled());

    h.orchestrator.set_enabled(false).await.unwrap();
    assert!(!h.orchestrator.is_enabled());
    h.orchestrator.enter_foreground().await.unwrap();
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Stopped);

    h.orchestrator.set_enabled(true).await.unwrap();
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);

    h.orchestrator.enter_background().await;
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Paused);

    h.orchestrator.enter_foreground().await.unwrap();
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Running);
    assert_eq!(h.local.starts(), 1);

    h.orchestrator.set_enabled(false).await.unwrap();
    assert_eq!(h.orchestrator.lifecycle(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_initial_sync_flag_is_persisted() {
    let h = harness_with(
        Dirs::new(),
        ScriptedMonitor::new(),
        ScriptedMonitor::new(),
        FakeBookmarks::responsive(),
    );
    let store = h.dirs.state_store();
    assert!(!store.initial_sync_finished().await);

    h.orchestrator.start().await.unwrap();
    h.local.emit(common::local_gather(1, Vec::new()));
    h.cloud.emit(common::cloud_gather(1, Vec::new()));

    let state = h.dirs.state.clone();
    assert!(common::eventually(|| state.exists()).await);
    assert!(store.initial_sync_finished().await);
    assert_eq!(h.bookmarks.loads(), 0);
}

#[tokio::test]
async fn test_restart_begins_with_fresh_listings() {
    let h = harness();
    h.orchestrator.start().await.unwrap();
    h.local.emit(common::local_gather(5, Vec::new()));
    h.orchestrator.stop().await;

    h.orchestrator.start().await.unwrap();
    // Generation 1 would be stale had the previous session's state survived
    h.emit_cloud_only_file();
    let target = h.dirs.local.join("a.kml");
    assert!(common::eventually(|| target.exists()).await);
}
