//! Per-path watch descriptors and the policy for acquiring them.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::budget::Warning;
use crate::error::{Result, WatcherError};

/// A descriptor opened on a watched path, used only to identify the vnode to
/// the kernel event queue. Dropping the handle closes the descriptor.
#[derive(Debug)]
pub struct WatchHandle {
    file: File,
    path: PathBuf,
}

impl WatchHandle {
    /// Path this handle was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying descriptor number.
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsRawFd for WatchHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for WatchHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Why a path could not be opened, decided once from the OS error.
#[derive(Debug)]
pub enum AcquireError {
    /// The path no longer exists.
    NotFound,

    /// The process or system descriptor table is full.
    ResourceExhausted,

    /// Anything else.
    Other(io::Error),
}

impl AcquireError {
    /// Classify an error returned by `open(2)`.
    pub fn classify(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            return Self::NotFound;
        }
        match err.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::ENOTDIR) => Self::NotFound,
            Some(libc::EMFILE) | Some(libc::ENFILE) => Self::ResourceExhausted,
            _ => Self::Other(err),
        }
    }
}

/// Open `path` read-only for event registration, without applying any policy.
pub fn open_handle(path: &Path) -> std::result::Result<WatchHandle, AcquireError> {
    let mut options = OpenOptions::new();
    options.read(true);

    // Event-only descriptors do not keep the volume busy on Apple platforms.
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_EVTONLY);
    }

    let file = options.open(path).map_err(AcquireError::classify)?;
    Ok(WatchHandle {
        file,
        path: path.to_path_buf(),
    })
}

/// Result of applying the acquisition policy to one path.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// The path was opened.
    Acquired(WatchHandle),

    /// The path disappeared before it could be opened.
    Vanished,

    /// The descriptor table is full; the path stays unwatched.
    Exhausted(Warning),
}

impl AcquireOutcome {
    /// The handle, if one was acquired.
    pub fn into_handle(self) -> Option<WatchHandle> {
        match self {
            Self::Acquired(handle) => Some(handle),
            Self::Vanished | Self::Exhausted(_) => None,
        }
    }
}

/// Open `path` for watching.
///
/// A vanished path is skipped silently and descriptor exhaustion is downgraded
/// to a warning. Every other failure is returned as an error.
pub fn acquire(path: &Path) -> Result<AcquireOutcome> {
    match open_handle(path) {
        Ok(handle) => Ok(AcquireOutcome::Acquired(handle)),
        Err(AcquireError::NotFound) => {
            debug!("Path vanished before it could be watched: {}", path.display());
            Ok(AcquireOutcome::Vanished)
        }
        Err(AcquireError::ResourceExhausted) => {
            let warning = Warning::TooManyOpenFiles {
                path: path.to_path_buf(),
            };
            warn!("{warning}");
            Ok(AcquireOutcome::Exhausted(warning))
        }
        Err(AcquireError::Other(source)) => Err(WatcherError::Acquire {
            path: path.to_path_buf(),
            source,
        }),
    }
}
