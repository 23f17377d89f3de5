//! Reconciliation rounds over real directories
//!
//! Each round scans both sides, resolves the listings and executes the
//! resulting actions. A round after convergence must produce nothing.

use mirrorsync_core::ports::ISyncStateStore;

use crate::common::{self, Dirs, Mirror};

#[tokio::test]
async fn test_local_file_is_uploaded_then_converges() {
    let dirs = Dirs::new();
    common::write_at(&dirs.local.join("a.kml"), b"alpha", 1_000);
    let mut mirror = Mirror::new(dirs, true);

    assert_eq!(mirror.round().await, vec!["create_cloud(a.kml)"]);
    let cloud = mirror.dirs.cloud.join("a.kml");
    assert_eq!(common::read(&cloud), b"alpha");
    assert_eq!(
        common::mtime(&cloud),
        common::mtime(&mirror.dirs.local.join("a.kml"))
    );

    assert!(mirror.round().await.is_empty());
    assert!(mirror.round().await.is_empty());
}

#[tokio::test]
async fn test_newer_cloud_edit_is_downloaded() {
    let dirs = Dirs::new();
    common::write_at(&dirs.local.join("a.kml"), b"old", 1_000);
    let mut mirror = Mirror::new(dirs, true);
    mirror.round().await;
    assert!(mirror.round().await.is_empty());

    common::write_at(&mirror.dirs.cloud.join("a.kml"), b"new", 2_000);
    assert_eq!(mirror.round().await, vec!["update_local(a.kml)"]);
    assert_eq!(common::read(&mirror.dirs.local.join("a.kml")), b"new");

    assert!(mirror.round().await.is_empty());
}

#[tokio::test]
async fn test_newer_local_edit_is_uploaded() {
    let dirs = Dirs::new();
    common::write_at(&dirs.cloud.join("a.kml"), b"old", 1_000);
    let mut mirror = Mirror::new(dirs, true);
    assert_eq!(mirror.round().await, vec!["create_local(a.kml)"]);
    assert!(mirror.round().await.is_empty());

    common::write_at(&mirror.dirs.local.join("a.kml"), b"edited", 3_000);
    assert_eq!(mirror.round().await, vec!["update_cloud(a.kml)"]);
    assert_eq!(common::read(&mirror.dirs.cloud.join("a.kml")), b"edited");

    assert!(mirror.round().await.is_empty());
}

#[tokio::test]
async fn test_timestamp_tie_with_different_content_takes_cloud_copy() {
    let dirs = Dirs::new();
    common::write_at(&dirs.local.join("a.kml"), b"local", 1_000);
    common::write_at(&dirs.cloud.join("a.kml"), b"cloud", 1_000);
    let mut mirror = Mirror::new(dirs, true);

    assert_eq!(mirror.round().await, vec!["update_local(a.kml)"]);
    assert_eq!(common::read(&mirror.dirs.local.join("a.kml")), b"cloud");
    assert!(mirror.round().await.is_empty());
}

#[tokio::test]
async fn test_local_deletion_moves_cloud_copy_to_trash() {
    let dirs = Dirs::new();
    common::write_at(&dirs.local.join("a.kml"), b"alpha", 1_000);
    let mut mirror = Mirror::new(dirs, true);
    mirror.round().await;
    assert!(mirror.round().await.is_empty());

    std::fs::remove_file(mirror.dirs.local.join("a.kml")).unwrap();
    assert_eq!(mirror.round().await, vec!["remove_cloud(a.kml)"]);
    assert!(!mirror.dirs.cloud.join("a.kml").exists());
    assert_eq!(
        common::read(&mirror.dirs.cloud.join(".Trash").join("a.kml")),
        b"alpha"
    );

    assert!(mirror.round().await.is_empty());
    assert!(!mirror.dirs.local.join("a.kml").exists());
}

#[tokio::test]
async fn test_cloud_deletion_removes_local_copy() {
    let dirs = Dirs::new();
    common::write_at(&dirs.cloud.join("a.kml"), b"alpha", 1_000);
    let mut mirror = Mirror::new(dirs, true);
    mirror.round().await;
    assert!(mirror.round().await.is_empty());

    std::fs::remove_file(mirror.dirs.cloud.join("a.kml")).unwrap();
    assert_eq!(mirror.round().await, vec!["remove_local(a.kml)"]);
    assert!(!mirror.dirs.local.join("a.kml").exists());
    assert!(mirror.round().await.is_empty());
}

#[tokio::test]
async fn test_placeholder_is_downloaded_before_copying() {
    let dirs = Dirs::new();
    let placeholder = dirs.cloud.join(".b.kml.icloud");
    common::write(&placeholder, b"");
    let mut mirror = Mirror::new(dirs, true);

    assert_eq!(mirror.round().await, vec!["start_download(b.kml)"]);
    assert!(mirror
        .reconciler
        .pending_downloads()
        .contains(&common::id("b.kml")));
    assert!(mirror.round().await.is_empty());

    // The provider materializes the file
    std::fs::remove_file(&placeholder).unwrap();
    common::write_at(&mirror.dirs.cloud.join("b.kml"), b"bravo", 1_000);

    assert_eq!(mirror.round().await, vec!["create_local(b.kml)"]);
    assert!(mirror.reconciler.pending_downloads().is_empty());
    assert_eq!(common::read(&mirror.dirs.local.join("b.kml")), b"bravo");
    assert!(mirror.round().await.is_empty());
}

#[tokio::test]
async fn test_version_conflict_keeps_current_copy_and_adopts_latest() {
    let dirs = Dirs::new();
    common::write_at(&dirs.cloud.join("a.kml"), b"current", 1_000);
    let versions = dirs.cloud.join(".versions").join("a.kml");
    common::write_at(&versions.join("v1"), b"latest", 3_000);
    common::write_at(&versions.join("v2"), b"older", 2_000);
    let mut mirror = Mirror::new(dirs, true);

    assert_eq!(
        mirror.round().await,
        vec!["resolve_version_conflict(a.kml)"]
    );
    assert_eq!(common::read(&mirror.dirs.cloud.join("a.kml")), b"latest");
    assert_eq!(common::read(&mirror.dirs.cloud.join("a_1.kml")), b"current");
    assert!(!versions.exists());

    assert_eq!(
        mirror.round().await,
        vec!["create_local(a.kml)", "create_local(a_1.kml)"]
    );
    assert!(mirror.round().await.is_empty());
}

#[tokio::test]
async fn test_initial_sync_keeps_both_copies() {
    let dirs = Dirs::new();
    common::write_at(&dirs.local.join("a.kml"), b"from laptop", 2_000);
    common::write_at(&dirs.cloud.join("a.kml"), b"from cloud", 1_000);
    let mut mirror = Mirror::new(dirs, false);

    assert_eq!(
        mirror.round().await,
        vec!["resolve_initial_sync_conflict(a.kml)"]
    );
    let local = &mirror.dirs.local;
    assert_eq!(common::read(&local.join("a.kml")), b"from cloud");
    assert_eq!(common::read(&local.join("a_1_laptop.kml")), b"from laptop");
    assert!(mirror.reconciler.state().is_initial_synchronization());

    assert_eq!(
        mirror.round().await,
        vec!["create_cloud(a_1_laptop.kml)", "mark_initial_sync_done"]
    );
    assert!(!mirror.reconciler.state().is_initial_synchronization());
    assert!(mirror.dirs.state_store().initial_sync_finished().await);

    assert!(mirror.round().await.is_empty());
    assert_eq!(
        common::read(&mirror.dirs.cloud.join("a_1_laptop.kml")),
        b"from laptop"
    );
}

#[tokio::test]
async fn test_initial_sync_with_identical_copies_finishes_at_once() {
    let dirs = Dirs::new();
    common::write_at(&dirs.local.join("a.kml"), b"same", 1_000);
    common::write_at(&dirs.cloud.join("a.kml"), b"same", 2_000);
    let mut mirror = Mirror::new(dirs, false);

    assert_eq!(mirror.round().await, vec!["mark_initial_sync_done"]);
    assert!(mirror.dirs.state_store().initial_sync_finished().await);
    assert!(mirror.round().await.is_empty());
}
