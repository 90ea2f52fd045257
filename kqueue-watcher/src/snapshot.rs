//! Directory-snapshot discovery and classification.
//!
//! kqueue only says that *something* happened to a vnode. For a directory that
//! means its entry list changed, so the snapshot re-lists it and diffs against
//! what it saw last time to recover which children were created, deleted or
//! renamed.

use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::WatcherConfig;
use crate::error::{Result, WatcherError};
use crate::event::{FileEvent, FileEventKind, RawKernelEvent, VnodeEvents};
use crate::host::{Classifier, PathDiscovery};

/// Identity of one snapshot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    dev: u64,
    ino: u64,
    is_dir: bool,
}

impl Entry {
    fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
            is_dir: metadata.is_dir(),
        }
    }

    fn same_file(&self, other: &Self) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }
}

/// The last known shape of a directory tree.
#[derive(Debug)]
pub struct DirectorySnapshot {
    root: PathBuf,
    max_depth: Option<usize>,
    follow_symlinks: bool,
    entries: BTreeMap<PathBuf, Entry>,
}

impl DirectorySnapshot {
    /// An empty snapshot of `root`. Call [`PathDiscovery::discover`] to fill it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: None,
            follow_symlinks: false,
            entries: BTreeMap::new(),
        }
    }

    /// A snapshot configured from `config`, which must name a root.
    pub fn from_config(config: &WatcherConfig) -> Result<Self> {
        let root = config
            .root
            .clone()
            .ok_or_else(|| WatcherError::Config("no root directory configured".to_string()))?;
        Ok(Self {
            max_depth: config.max_depth,
            follow_symlinks: config.follow_symlinks,
            ..Self::new(root)
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of known entries, root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        if self.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
    }

    fn depth(&self, path: &Path) -> usize {
        path.strip_prefix(&self.root)
            .map(|rel| rel.components().count())
            .unwrap_or(0)
    }

    fn within_depth(&self, path: &Path) -> bool {
        self.max_depth.is_none_or(|max| self.depth(path) <= max)
    }

    /// `path` followed by every known descendant, in sorted order.
    fn subtree(&self, path: &Path) -> Vec<PathBuf> {
        self.entries
            .range(path.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn children(&self, dir: &Path) -> Vec<(PathBuf, Entry)> {
        self.entries
            .range(dir.to_path_buf()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(dir))
            .filter(|(p, _)| p.parent() == Some(dir))
            .map(|(p, e)| (p.clone(), *e))
            .collect()
    }

    /// Forget `path` and its descendants. Descendants are reported as deleted,
    /// children before parents; `path` itself is reported as `kind`.
    fn remove_subtree(&mut self, path: &Path, kind: FileEventKind, out: &mut Vec<FileEvent>) {
        for p in self.subtree(path).into_iter().rev() {
            let Some(entry) = self.entries.remove(&p) else {
                continue;
            };
            let kind = if p == path {
                kind
            } else {
                FileEventKind::Deleted
            };
            out.push(FileEvent::new(kind, p).directory(entry.is_dir));
        }
    }

    /// Record `path` as `kind` and walk any directory contents into the
    /// snapshot as created, parents before children.
    fn add_subtree(
        &mut self,
        path: PathBuf,
        entry: Entry,
        kind: FileEventKind,
        out: &mut Vec<FileEvent>,
    ) {
        let remaining = self.max_depth.map(|max| max.saturating_sub(self.depth(&path)));
        self.entries.insert(path.clone(), entry);
        out.push(FileEvent::new(kind, &path).directory(entry.is_dir));

        if !entry.is_dir || remaining == Some(0) {
            return;
        }

        let walker = WalkDir::new(&path)
            .min_depth(1)
            .max_depth(remaining.unwrap_or(usize::MAX))
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();

        for item in walker {
            match item {
                Ok(item) => {
                    let Ok(metadata) = item.metadata() else {
                        continue;
                    };
                    let entry = Entry::from_metadata(&metadata);
                    self.entries.insert(item.path().to_path_buf(), entry);
                    out.push(FileEvent::created(item.path()).directory(entry.is_dir));
                }
                Err(e) => debug!("Skipping unreadable entry under {}: {e}", path.display()),
            }
        }
    }

    /// Re-list `dir` and report how its children changed.
    fn rescan(&mut self, dir: &Path, out: &mut Vec<FileEvent>) {
        let listing = match fs::read_dir(dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.remove_subtree(dir, FileEventKind::Deleted, out);
                return;
            }
            Err(e) => {
                warn!("Failed to rescan {}: {e}", dir.display());
                return;
            }
        };

        let mut current: BTreeMap<PathBuf, Entry> = BTreeMap::new();
        for item in listing.flatten() {
            let path = item.path();
            if !self.within_depth(&path) {
                continue;
            }
            if let Ok(metadata) = self.metadata(&path) {
                current.insert(path, Entry::from_metadata(&metadata));
            }
        }

        let mut vanished = Vec::new();
        for (path, entry) in self.children(dir) {
            match current.get(&path) {
                Some(now) if now.same_file(&entry) => {
                    current.remove(&path);
                }
                // Replaced in place: the old vnode is gone.
                Some(_) => self.remove_subtree(&path, FileEventKind::Deleted, out),
                None => vanished.push((path, entry)),
            }
        }

        let mut appeared: Vec<(PathBuf, Entry)> = current.into_iter().collect();
        for (old, entry) in vanished {
            match appeared.iter().position(|(_, new)| new.same_file(&entry)) {
                Some(index) => {
                    let (new, new_entry) = appeared.remove(index);
                    self.remove_subtree(&old, FileEventKind::RenamedFrom, out);
                    self.add_subtree(new, new_entry, FileEventKind::RenamedTo, out);
                }
                None => self.remove_subtree(&old, FileEventKind::Deleted, out),
            }
        }

        for (new, entry) in appeared {
            self.add_subtree(new, entry, FileEventKind::Created, out);
        }
    }

    /// Bring `path` in line with what is on disk now.
    fn reconcile(&mut self, path: &Path, out: &mut Vec<FileEvent>) {
        if let Some(parent) = path.parent().filter(|parent| self.entries.contains_key(*parent)) {
            self.rescan(parent, out);
            return;
        }

        let Ok(metadata) = self.metadata(path) else {
            self.remove_subtree(path, FileEventKind::Deleted, out);
            return;
        };
        let current = Entry::from_metadata(&metadata);
        match self.entries.get(path).copied() {
            Some(known) if known.same_file(&current) => {}
            Some(_) => {
                self.remove_subtree(path, FileEventKind::Deleted, out);
                self.add_subtree(path.to_path_buf(), current, FileEventKind::Created, out);
            }
            None => {}
        }
    }

    fn classify_one(&mut self, event: &RawKernelEvent, out: &mut Vec<FileEvent>) {
        let path = event.path.as_path();
        let flags = event.flags;

        if flags.is_removal() {
            // The vnode behind a queued DELETE may already have been replaced,
            // e.g. by renaming a temporary file over `path`.
            if self.metadata(path).is_ok() {
                self.reconcile(path, out);
            } else {
                self.remove_subtree(path, FileEventKind::Deleted, out);
            }
            return;
        }

        let Some(entry) = self.entries.get(path).copied() else {
            // Already forgotten earlier in this batch.
            return;
        };

        if flags.contains(VnodeEvents::RENAME) {
            match path.parent().filter(|parent| self.entries.contains_key(*parent)) {
                Some(parent) => self.rescan(parent, out),
                None => self.remove_subtree(path, FileEventKind::Deleted, out),
            }
            return;
        }

        if entry.is_dir {
            if flags.intersects(VnodeEvents::WRITE | VnodeEvents::EXTEND | VnodeEvents::LINK) {
                self.rescan(path, out);
            }
            if flags.contains(VnodeEvents::ATTRIB) && self.entries.contains_key(path) {
                out.push(FileEvent::new(FileEventKind::MetadataChanged, path).directory(true));
            }
        } else if flags.is_content_change() {
            out.push(FileEvent::new(FileEventKind::Modified, path));
        } else if flags.intersects(VnodeEvents::ATTRIB | VnodeEvents::LINK) {
            out.push(FileEvent::new(FileEventKind::MetadataChanged, path));
        }
    }
}

impl PathDiscovery for DirectorySnapshot {
    /// Walk the tree from the root and replace the snapshot with what is found.
    fn discover(&mut self) -> Result<Vec<PathBuf>> {
        let mut walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        self.entries.clear();
        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(e) if e.depth() == 0 => {
                    return Err(match e.into_io_error() {
                        Some(err) => WatcherError::Io(err),
                        None => WatcherError::Config(format!(
                            "symlink loop at {}",
                            self.root.display()
                        )),
                    });
                }
                Err(e) => {
                    debug!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            let Ok(metadata) = item.metadata() else {
                continue;
            };
            self.entries
                .insert(item.path().to_path_buf(), Entry::from_metadata(&metadata));
        }

        debug!("Discovered {} entries under {}", self.entries.len(), self.root.display());
        Ok(self.entries.keys().cloned().collect())
    }
}

impl Classifier for DirectorySnapshot {
    fn classify(&mut self, raw: &[RawKernelEvent]) -> Vec<FileEvent> {
        let mut out = Vec::new();
        for event in raw {
            self.classify_one(event, &mut out);
        }
        out
    }
}
