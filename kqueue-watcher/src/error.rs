//! Error types for the kqueue watcher.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the kqueue watcher.
///
/// Only fatal conditions are represented here. A path that vanished before it
/// could be opened, or a process that ran out of descriptors, is handled where
/// it happens and never surfaces as an error.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The kernel refused to create the event queue.
    #[error("failed to create kernel event queue: {0}")]
    FacilityUnavailable(#[source] io::Error),

    /// A descriptor could not be added to the kernel interest list.
    #[error("failed to register {} with the kernel event queue: {source}", path.display())]
    Registration {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Opening a path failed for a reason other than absence or descriptor exhaustion.
    #[error("failed to open {} for watching: {source}", path.display())]
    Acquire {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading ready events from the kernel queue failed.
    #[error("failed to drain kernel events: {0}")]
    Drain(#[source] io::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Channel send error.
    #[error("channel error: failed to send event")]
    ChannelSend,

    /// The current platform has no kqueue.
    #[error("unsupported platform: {0}")]
    Unsupported(String),
}

impl WatcherError {
    /// Path the error is about, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Registration { path, .. } | Self::Acquire { path, .. } => Some(path),
            _ => None,
        }
    }
}
