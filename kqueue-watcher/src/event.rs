//! Kernel and classified file events.

use std::fmt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Vnode-level changes reported by the kernel (`EVFILT_VNODE` fflags).
    ///
    /// The bit values are the `NOTE_*` constants shared by macOS and the BSDs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VnodeEvents: u32 {
        const DELETE = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const EXTEND = 0x0000_0004;
        const ATTRIB = 0x0000_0008;
        const LINK = 0x0000_0010;
        const RENAME = 0x0000_0020;
        const REVOKE = 0x0000_0040;
    }
}

impl VnodeEvents {
    /// The interest set every watched descriptor is registered with.
    pub const WATCHED: Self = Self::DELETE
        .union(Self::WRITE)
        .union(Self::EXTEND)
        .union(Self::ATTRIB)
        .union(Self::LINK)
        .union(Self::RENAME)
        .union(Self::REVOKE);

    /// The entity is gone (deleted or its filesystem revoked).
    pub fn is_removal(self) -> bool {
        self.intersects(Self::DELETE | Self::REVOKE)
    }

    /// Content changed.
    pub fn is_content_change(self) -> bool {
        self.intersects(Self::WRITE | Self::EXTEND)
    }
}

impl fmt::Display for VnodeEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// A ready kernel event, resolved back to the watched path that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKernelEvent {
    /// Watched path whose descriptor fired.
    pub path: PathBuf,

    /// Which vnode changes fired.
    pub flags: VnodeEvents,
}

impl RawKernelEvent {
    /// Create a raw event.
    pub fn new(path: impl Into<PathBuf>, flags: VnodeEvents) -> Self {
        Self {
            path: path.into(),
            flags,
        }
    }
}

/// A classified file system event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// Whether the path is (or was) a directory.
    pub is_directory: bool,

    /// When the event was classified.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory: false,
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for a `Created` event.
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Created, path)
    }

    /// Shorthand for a `Deleted` event.
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Deleted, path)
    }

    /// Mark the event as concerning a directory.
    pub fn directory(mut self, is_directory: bool) -> Self {
        self.is_directory = is_directory;
        self
    }

    /// Path as a `Path`.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Kind of classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// File or directory was created.
    Created,

    /// File content was modified.
    Modified,

    /// File or directory was deleted.
    Deleted,

    /// Entry was renamed (old path).
    RenamedFrom,

    /// Entry was renamed (new path).
    RenamedTo,

    /// Metadata (mode, owner, link count, times) changed.
    MetadataChanged,
}

impl FileEventKind {
    /// The path now exists and needs a watch descriptor.
    pub fn adds_watch(self) -> bool {
        matches!(self, Self::Created | Self::RenamedTo)
    }

    /// The path is gone and its watch descriptor must be released.
    pub fn removes_watch(self) -> bool {
        matches!(self, Self::Deleted | Self::RenamedFrom)
    }
}
