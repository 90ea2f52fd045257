//! The authoritative path → descriptor mapping.

use std::collections::{BTreeSet, HashMap};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use crate::handle::WatchHandle;

/// Owns every open watch descriptor, keyed by path.
///
/// The registry does no I/O. Callers register a handle with the kernel before
/// adding it here and release it after removing it, so an entry exists exactly
/// while its descriptor is registered.
#[derive(Debug, Default)]
pub struct WatchSetRegistry {
    handles: HashMap<PathBuf, WatchHandle>,
    by_fd: HashMap<RawFd, PathBuf>,
}

impl WatchSetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `path`. An overwritten handle is closed.
    pub fn add(&mut self, path: impl Into<PathBuf>, handle: WatchHandle) {
        let path = path.into();
        let fd = handle.fd();
        if let Some(previous) = self.handles.insert(path.clone(), handle) {
            self.by_fd.remove(&previous.fd());
        }
        self.by_fd.insert(fd, path);
    }

    /// Remove the entry for `path`, handing its descriptor back for release.
    pub fn remove(&mut self, path: &Path) -> Option<WatchHandle> {
        let handle = self.handles.remove(path)?;
        self.by_fd.remove(&handle.fd());
        Some(handle)
    }

    /// Number of open watch descriptors.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.handles.contains_key(path)
    }

    /// Path registered under descriptor `fd`.
    pub fn path_for(&self, fd: RawFd) -> Option<&Path> {
        self.by_fd.get(&fd).map(PathBuf::as_path)
    }

    /// All watched paths, sorted.
    pub fn snapshot_paths(&self) -> BTreeSet<PathBuf> {
        self.handles.keys().cloned().collect()
    }

    /// Descriptors of every entry.
    pub fn fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.by_fd.keys().copied()
    }

    /// Take every handle out of the registry.
    pub fn drain_all(&mut self) -> Vec<WatchHandle> {
        self.by_fd.clear();
        self.handles.drain().map(|(_, handle)| handle).collect()
    }
}
