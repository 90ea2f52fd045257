//! End-to-end tests against the real kernel queue.

#![cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use codex_kqueue_watcher::{
    DirectorySnapshot, EventLoopAdapter, FileEventKind, Kqueue, KqueueWatcher, PathDiscovery,
    WatcherConfig,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_file_created_in_watched_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let mut snapshot = DirectorySnapshot::new(&root);
    let paths = snapshot.discover().unwrap();

    let mut watcher = KqueueWatcher::<Kqueue, _>::new(WatcherConfig::new(&root), snapshot).unwrap();
    watcher.init(&paths).unwrap();
    let mut adapter = EventLoopAdapter::new(watcher).unwrap();

    let file = root.join("c.txt");
    std::fs::write(&file, "c").unwrap();

    let cycle = tokio::time::timeout(Duration::from_secs(5), adapter.next_batch())
        .await
        .unwrap()
        .unwrap();

    assert!(
        cycle
            .events
            .iter()
            .any(|e| e.kind == FileEventKind::Created && e.path == file)
    );
    assert!(adapter.watcher().is_watching(&file));
}

#[tokio::test]
async fn test_deleted_file_is_unwatched() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let file = root.join("b.txt");
    std::fs::write(&file, "b").unwrap();

    let mut snapshot = DirectorySnapshot::new(&root);
    let paths = snapshot.discover().unwrap();
    let mut watcher = KqueueWatcher::<Kqueue, _>::new(WatcherConfig::new(&root), snapshot).unwrap();
    watcher.init(&paths).unwrap();
    let mut adapter = EventLoopAdapter::new(watcher).unwrap();

    std::fs::remove_file(&file).unwrap();

    while adapter.watcher().is_watching(&file) {
        tokio::time::timeout(Duration::from_secs(5), adapter.next_batch())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(adapter.watcher().len(), 1);
}
