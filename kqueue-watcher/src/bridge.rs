//! Registration and draining against the kernel event queue.

use std::os::fd::{AsRawFd, RawFd};
use std::vec;

use tracing::{debug, warn};

use crate::config::DEFAULT_DRAIN_CAPACITY;
use crate::error::{Result, WatcherError};
use crate::event::{RawKernelEvent, VnodeEvents};
use crate::facility::{EventFacility, FacilityEvent};
use crate::handle::WatchHandle;
use crate::registry::WatchSetRegistry;

/// Owns the kernel event queue and the interest list of per-path descriptors.
#[derive(Debug)]
pub struct KernelEventBridge<F> {
    facility: F,
    drain_capacity: usize,
}

impl<F: EventFacility> KernelEventBridge<F> {
    /// Create the kernel event queue.
    pub fn open(drain_capacity: usize) -> Result<Self> {
        let facility = F::open().map_err(WatcherError::FacilityUnavailable)?;
        Ok(Self::with_facility(facility, drain_capacity))
    }

    /// Open with the default drain capacity.
    pub fn open_default() -> Result<Self> {
        Self::open(DEFAULT_DRAIN_CAPACITY)
    }

    /// Wrap an already opened queue.
    pub fn with_facility(facility: F, drain_capacity: usize) -> Self {
        Self {
            facility,
            drain_capacity: drain_capacity.max(1),
        }
    }

    /// Add `handle` to the interest list for every vnode change.
    pub fn register(&mut self, handle: &WatchHandle) -> Result<()> {
        self.facility
            .register(handle.fd(), VnodeEvents::WATCHED)
            .map_err(|source| WatcherError::Registration {
                path: handle.path().to_path_buf(),
                source,
            })?;
        debug!("Registered {} (fd {})", handle.path().display(), handle.fd());
        Ok(())
    }

    /// Take `handle` off the interest list and close it.
    pub fn release(&mut self, handle: WatchHandle) {
        if let Err(e) = self.facility.unregister(handle.fd()) {
            warn!("Failed to unregister {}: {e}", handle.path().display());
        }
        debug!("Released {} (fd {})", handle.path().display(), handle.fd());
    }

    /// Read everything the kernel has ready right now.
    ///
    /// The returned iterator resolves descriptors to paths through `registry`
    /// as it is consumed; events for descriptors that are no longer watched are
    /// dropped.
    pub fn drain<'a>(&mut self, registry: &'a WatchSetRegistry) -> Result<Drain<'a>> {
        let ready = self
            .facility
            .poll_ready(self.drain_capacity)
            .map_err(WatcherError::Drain)?;
        Ok(Drain {
            ready: ready.into_iter(),
            registry,
        })
    }

    pub fn facility(&self) -> &F {
        &self.facility
    }

    pub fn facility_mut(&mut self) -> &mut F {
        &mut self.facility
    }
}

impl<F: EventFacility> AsRawFd for KernelEventBridge<F> {
    fn as_raw_fd(&self) -> RawFd {
        self.facility.as_raw_fd()
    }
}

/// Events from one drain call, resolved lazily against the watch set.
#[derive(Debug)]
pub struct Drain<'a> {
    ready: vec::IntoIter<FacilityEvent>,
    registry: &'a WatchSetRegistry,
}

impl Iterator for Drain<'_> {
    type Item = RawKernelEvent;

    fn next(&mut self) -> Option<Self::Item> {
        for event in self.ready.by_ref() {
            match self.registry.path_for(event.fd) {
                Some(path) => return Some(RawKernelEvent::new(path, event.flags)),
                None => debug!("Dropping event for unwatched fd {}", event.fd),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.ready.size_hint().1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handle::open_handle;
    use crate::loopback::LoopbackFacility;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_register_then_drain_resolves_paths() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("b.txt");
        std::fs::write(&path, "b").unwrap();

        let mut bridge = KernelEventBridge::<LoopbackFacility>::open_default().unwrap();
        let injector = bridge.facility().injector().unwrap();
        let mut registry = WatchSetRegistry::new();

        let handle = open_handle(&path).unwrap();
        let fd = handle.fd();
        bridge.register(&handle).unwrap();
        registry.add(&path, handle);

        injector.fire(fd, VnodeEvents::WRITE | VnodeEvents::EXTEND).unwrap();
        let events: Vec<_> = bridge.drain(&registry).unwrap().collect();

        assert_eq!(
            events,
            vec![RawKernelEvent::new(
                &path,
                VnodeEvents::WRITE | VnodeEvents::EXTEND
            )]
        );
        assert_eq!(bridge.drain(&registry).unwrap().count(), 0);
    }

    #[test]
    fn test_release_unregisters() {
        let temp_dir = TempDir::new().unwrap();
        let mut bridge = KernelEventBridge::<LoopbackFacility>::open_default().unwrap();

        let handle = open_handle(temp_dir.path()).unwrap();
        let fd = handle.fd();
        bridge.register(&handle).unwrap();
        assert!(bridge.facility().is_registered(fd));

        bridge.release(handle);
        assert!(!bridge.facility().is_registered(fd));
    }

    #[test]
    fn test_registration_failure_names_path() {
        let temp_dir = TempDir::new().unwrap();
        let mut bridge = KernelEventBridge::<LoopbackFacility>::open_default().unwrap();
        bridge.facility_mut().reject_registrations(true);

        let handle = open_handle(temp_dir.path()).unwrap();
        let err = bridge.register(&handle).unwrap_err();
        assert!(matches!(err, WatcherError::Registration { .. }));
        assert_eq!(err.path(), Some(temp_dir.path()));
    }

    #[test]
    fn test_drain_skips_unknown_descriptors() {
        let temp_dir = TempDir::new().unwrap();
        let mut bridge = KernelEventBridge::<LoopbackFacility>::open_default().unwrap();
        let injector = bridge.facility().injector().unwrap();
        let registry = WatchSetRegistry::new();

        // Registered with the queue but never added to the watch set.
        let handle = open_handle(temp_dir.path()).unwrap();
        bridge.register(&handle).unwrap();
        injector.fire(handle.fd(), VnodeEvents::ATTRIB).unwrap();

        assert_eq!(bridge.drain(&registry).unwrap().count(), 0);
    }
}
