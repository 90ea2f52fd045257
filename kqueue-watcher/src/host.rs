//! Capabilities the host supplies to the watcher.
//!
//! The watcher never enumerates directory trees or interprets kernel events
//! itself. A host provides the initial path set through [`PathDiscovery`] and
//! turns raw kernel events into created/deleted/modified events through a
//! [`Classifier`]. [`crate::snapshot::DirectorySnapshot`] implements both.

use std::path::PathBuf;

use crate::error::Result;
use crate::event::{FileEvent, RawKernelEvent};

/// Supplies the initial set of paths to watch.
pub trait PathDiscovery {
    /// Every file and directory that should be watched at startup.
    fn discover(&mut self) -> Result<Vec<PathBuf>>;
}

/// Turns one drained batch of kernel events into classified events.
///
/// Classified events are applied to the watch set in the order returned, so a
/// new directory must be reported before its contents.
pub trait Classifier {
    fn classify(&mut self, raw: &[RawKernelEvent]) -> Vec<FileEvent>;
}

impl<F> Classifier for F
where
    F: FnMut(&[RawKernelEvent]) -> Vec<FileEvent>,
{
    fn classify(&mut self, raw: &[RawKernelEvent]) -> Vec<FileEvent> {
        self(raw)
    }
}

impl PathDiscovery for Vec<PathBuf> {
    fn discover(&mut self) -> Result<Vec<PathBuf>> {
        Ok(self.clone())
    }
}
