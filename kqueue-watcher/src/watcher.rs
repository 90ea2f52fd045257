//! The kqueue watcher: initial watch set, drain cycles and teardown.

use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::bridge::KernelEventBridge;
use crate::budget::ResourceBudgetGuard;
use crate::config::WatcherConfig;
use crate::error::Result;
use crate::event::{FileEvent, RawKernelEvent};
use crate::facility::EventFacility;
use crate::host::Classifier;
use crate::maintenance::{MaintenanceReport, WatchMaintenance};
use crate::registry::WatchSetRegistry;

/// Watches a set of paths through one kernel event queue.
///
/// All state is owned and mutated through `&mut self`; run it from a single
/// task (see [`crate::EventLoopAdapter::spawn`]) when the host is multi-threaded.
pub struct KqueueWatcher<F: EventFacility, C> {
    // Declared before `bridge` so every watch descriptor closes before the queue.
    registry: WatchSetRegistry,

    /// Kernel event queue.
    bridge: KernelEventBridge<F>,

    /// Watch-set maintenance and budget checks.
    maintenance: WatchMaintenance,

    /// Turns raw kernel events into file events.
    classifier: C,

    config: WatcherConfig,
}

impl<F: EventFacility, C: Classifier> KqueueWatcher<F, C> {
    /// Create a watcher with a new kernel event queue.
    pub fn new(config: WatcherConfig, classifier: C) -> Result<Self> {
        config.validate()?;
        let bridge = KernelEventBridge::open(config.drain_capacity)?;
        Ok(Self::with_bridge(config, bridge, classifier))
    }

    /// Create a watcher around an existing bridge.
    pub fn with_bridge(config: WatcherConfig, bridge: KernelEventBridge<F>, classifier: C) -> Self {
        Self {
            registry: WatchSetRegistry::new(),
            bridge,
            maintenance: WatchMaintenance::new(ResourceBudgetGuard::new(
                config.descriptor_warning_threshold,
            )),
            classifier,
            config,
        }
    }

    /// Start watching the initial path set.
    ///
    /// Paths that vanished or could not be opened for lack of descriptors are
    /// skipped. Any other failure aborts initialization; paths watched so far
    /// stay registered.
    pub fn init<I>(&mut self, paths: I) -> Result<MaintenanceReport>
    where
        I: IntoIterator,
        I::Item: AsRef<Path>,
    {
        let mut report = MaintenanceReport::default();
        for path in paths {
            self.maintenance.watch(
                &mut self.bridge,
                &mut self.registry,
                path.as_ref(),
                &mut report,
            )?;
        }
        self.maintenance.check_budget(&self.registry, &mut report);

        info!(
            "Watching {} paths ({} skipped)",
            self.registry.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Run one drain cycle: read ready kernel events, classify them and bring
    /// the watch set up to date.
    pub fn process_ready(&mut self) -> Result<DrainCycle> {
        let raw: Vec<RawKernelEvent> = self.bridge.drain(&self.registry)?.collect();
        if raw.is_empty() {
            return Ok(DrainCycle::default());
        }

        let events = self.classifier.classify(&raw);
        let report = self.apply(&events);
        debug!(
            "Drained {} kernel events into {} file events",
            raw.len(),
            events.len()
        );

        Ok(DrainCycle {
            raw,
            events,
            report,
        })
    }

    /// Apply already classified events to the watch set.
    pub fn apply(&mut self, events: &[FileEvent]) -> MaintenanceReport {
        self.maintenance
            .apply(&mut self.bridge, &mut self.registry, events)
    }

    /// Release every watch descriptor, then close the kernel queue.
    pub fn shutdown(mut self) {
        let handles = self.registry.drain_all();
        let count = handles.len();
        for handle in handles {
            self.bridge.release(handle);
        }
        info!("Kqueue watcher stopped; released {count} descriptors");
    }

    /// Whether `path` is watched.
    pub fn is_watching(&self, path: &Path) -> bool {
        self.registry.contains(path)
    }

    /// Watched paths, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.registry.snapshot_paths().into_iter().collect()
    }

    /// Number of open watch descriptors.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn registry(&self) -> &WatchSetRegistry {
        &self.registry
    }

    pub fn bridge(&self) -> &KernelEventBridge<F> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut KernelEventBridge<F> {
        &mut self.bridge
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Get statistics about the watch set.
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            watched: self.registry.len(),
            warning_threshold: self.maintenance.guard().threshold(),
        }
    }
}

impl<F: EventFacility, C> AsRawFd for KqueueWatcher<F, C> {
    fn as_raw_fd(&self) -> RawFd {
        self.bridge.as_raw_fd()
    }
}

/// Everything one drain cycle produced.
#[derive(Debug, Default)]
pub struct DrainCycle {
    /// Kernel events, in delivery order.
    pub raw: Vec<RawKernelEvent>,

    /// Classified events, in the order they were applied.
    pub events: Vec<FileEvent>,

    /// Watch-set changes made for `events`.
    pub report: MaintenanceReport,
}

impl DrainCycle {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Statistics about the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStats {
    /// Open watch descriptors.
    pub watched: usize,

    /// Configured descriptor warning threshold.
    pub warning_threshold: usize,
}
