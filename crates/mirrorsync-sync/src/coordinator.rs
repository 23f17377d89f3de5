//! Coordinated file access
//!
//! Every read or write the executor performs goes through a
//! [`FileCoordinator`], which holds an async mutex per path for the duration
//! of the operation. Two operations touching the same path never overlap,
//! whichever code path issued them; operations on disjoint paths run freely.
//!
//! Multi-path operations lock their paths in sorted order so two operations
//! over overlapping sets cannot deadlock.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::trace;

/// Per-path mutual exclusion for file operations
#[derive(Debug, Default)]
pub struct FileCoordinator {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `op` while holding exclusive access to every path in `paths`
    ///
    /// Duplicate paths are locked once. Locks no longer referenced by any
    /// operation are dropped from the table afterwards.
    pub async fn coordinate<F, Fut, T>(&self, paths: &[&Path], op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut keys: Vec<PathBuf> = paths.iter().map(|p| p.to_path_buf()).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = self.lock_for(key);
            trace!(path = %key.display(), "Waiting for coordinated access");
            guards.push(lock.lock_owned().await);
        }

        let result = op().await;

        drop(guards);
        for key in &keys {
            self.locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
        result
    }

    /// Number of paths currently tracked
    pub fn tracked_paths(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_is_serialized() {
        let coordinator = Arc::new(FileCoordinator::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .coordinate(&[Path::new("/a.kml")], || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.tracked_paths(), 0);
    }

    #[tokio::test]
    async fn test_disjoint_paths_run_concurrently() {
        let coordinator = Arc::new(FileCoordinator::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let c1 = coordinator.clone();
        let first = tokio::spawn(async move {
            c1.coordinate(&[Path::new("/a.kml")], move || async move {
                rx.await.unwrap();
            })
            .await;
        });

        // Would hang if /b.kml waited on /a.kml
        tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.coordinate(&[Path::new("/b.kml")], move || async move {
                tx.send(()).unwrap();
            }),
        )
        .await
        .unwrap();
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_overlapping_sets_do_not_deadlock() {
        let coordinator = Arc::new(FileCoordinator::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let (a, b) = if i % 2 == 0 {
                    (Path::new("/x"), Path::new("/y"))
                } else {
                    (Path::new("/y"), Path::new("/x"))
                };
                coordinator
                    .coordinate(&[a, b], || async {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    })
                    .await;
            }));
        }
        tokio::time::timeout(Duration::from_secs(10), async {
            for handle in handles {
                handle.await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_paths_lock_once() {
        let coordinator = FileCoordinator::new();
        let value = coordinator
            .coordinate(&[Path::new("/a"), Path::new("/a")], || async { 7 })
            .await;
        assert_eq!(value, 7);
    }
}
