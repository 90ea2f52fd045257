//! Keeping the watch set in step with the filesystem tree.

use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::budget::{ResourceBudgetGuard, Warning};
use crate::bridge::KernelEventBridge;
use crate::error::{Result, WatcherError};
use crate::event::FileEvent;
use crate::facility::EventFacility;
use crate::handle::{AcquireOutcome, acquire};
use crate::registry::WatchSetRegistry;

/// What a batch of watch-set changes did.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    /// Paths that gained a watch descriptor.
    pub added: Vec<PathBuf>,

    /// Paths whose watch descriptor was released.
    pub removed: Vec<PathBuf>,

    /// Paths that could not be opened and are left unwatched.
    pub skipped: Vec<PathBuf>,

    /// Recoverable conditions raised while processing the batch.
    pub warnings: Vec<Warning>,

    /// Per-path fatal failures. The rest of the batch was still applied.
    pub failures: Vec<WatcherError>,
}

impl MaintenanceReport {
    /// No failures and no warnings.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.warnings.is_empty()
    }

    /// Budget warnings only.
    pub fn budget_warnings(&self) -> impl Iterator<Item = &Warning> {
        self.warnings
            .iter()
            .filter(|w| matches!(w, Warning::BudgetExceeded { .. }))
    }
}

/// Applies classified create/delete events to the kernel interest list and the
/// watch set.
#[derive(Debug, Clone, Default)]
pub struct WatchMaintenance {
    guard: ResourceBudgetGuard,
}

impl WatchMaintenance {
    pub fn new(guard: ResourceBudgetGuard) -> Self {
        Self { guard }
    }

    pub fn guard(&self) -> &ResourceBudgetGuard {
        &self.guard
    }

    /// Open, register and record `path`.
    ///
    /// Returns `Ok(false)` when the policy skipped the path. A path that is
    /// already watched gets a fresh descriptor; the old one is released.
    pub fn watch<F: EventFacility>(
        &self,
        bridge: &mut KernelEventBridge<F>,
        registry: &mut WatchSetRegistry,
        path: &Path,
        report: &mut MaintenanceReport,
    ) -> Result<bool> {
        let handle = match acquire(path)? {
            AcquireOutcome::Acquired(handle) => handle,
            AcquireOutcome::Vanished => {
                report.skipped.push(path.to_path_buf());
                return Ok(false);
            }
            AcquireOutcome::Exhausted(warning) => {
                report.skipped.push(path.to_path_buf());
                report.warnings.push(warning);
                return Ok(false);
            }
        };

        // On failure the handle is dropped here, closing the descriptor.
        bridge.register(&handle)?;

        if let Some(previous) = registry.remove(path) {
            bridge.release(previous);
        }
        registry.add(path, handle);
        report.added.push(path.to_path_buf());
        Ok(true)
    }

    /// Drop `path` from the watch set and release its descriptor.
    pub fn unwatch<F: EventFacility>(
        &self,
        bridge: &mut KernelEventBridge<F>,
        registry: &mut WatchSetRegistry,
        path: &Path,
        report: &mut MaintenanceReport,
    ) -> bool {
        match registry.remove(path) {
            Some(handle) => {
                bridge.release(handle);
                report.removed.push(path.to_path_buf());
                true
            }
            None => {
                debug!("Ignoring removal of unwatched path: {}", path.display());
                false
            }
        }
    }

    /// Apply a classified batch in order, then check the descriptor budget once.
    ///
    /// Events other than creations, deletions and renames leave the watch set
    /// untouched. An empty batch does nothing at all.
    pub fn apply<F: EventFacility>(
        &self,
        bridge: &mut KernelEventBridge<F>,
        registry: &mut WatchSetRegistry,
        events: &[FileEvent],
    ) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if events.is_empty() {
            return report;
        }

        for event in events {
            if event.kind.adds_watch() {
                if let Err(e) = self.watch(bridge, registry, &event.path, &mut report) {
                    error!("Failed to watch {}: {e}", event.path.display());
                    report.failures.push(e);
                }
            } else if event.kind.removes_watch() {
                self.unwatch(bridge, registry, &event.path, &mut report);
            }
        }

        self.check_budget(registry, &mut report);
        report
    }

    /// Run the budget check against the current watch-set size.
    pub fn check_budget(&self, registry: &WatchSetRegistry, report: &mut MaintenanceReport) {
        if let Some(warning) = self.guard.check(registry.len()) {
            report.warnings.push(warning);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::FileEventKind;
    use crate::loopback::LoopbackFacility;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        bridge: KernelEventBridge<LoopbackFacility>,
        registry: WatchSetRegistry,
        maintenance: WatchMaintenance,
    }

    impl Fixture {
        fn new(threshold: usize) -> Self {
            Self {
                temp_dir: TempDir::new().unwrap(),
                bridge: KernelEventBridge::open_default().unwrap(),
                registry: WatchSetRegistry::new(),
                maintenance: WatchMaintenance::new(ResourceBudgetGuard::new(threshold)),
            }
        }

        fn touch(&self, name: &str) -> PathBuf {
            let path = self.temp_dir.path().join(name);
            std::fs::write(&path, name).unwrap();
            path
        }

        fn apply(&mut self, events: &[FileEvent]) -> MaintenanceReport {
            self.maintenance
                .apply(&mut self.bridge, &mut self.registry, events)
        }

        fn assert_consistent(&self) {
            let mut registered: Vec<_> = self.bridge.facility().registered().collect();
            let mut watched: Vec<_> = self.registry.fds().collect();
            registered.sort_unstable();
            watched.sort_unstable();
            assert_eq!(registered, watched);
        }
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut fx = Fixture::new(0);
        let path = fx.touch("a");
        fx.apply(&[FileEvent::created(&path)]);

        let report = fx.apply(&[]);
        assert!(report.is_clean());
        assert!(report.added.is_empty());
        assert_eq!(fx.registry.len(), 1);
    }

    #[test]
    fn test_create_then_delete_in_one_batch_leaves_no_descriptor() {
        let mut fx = Fixture::new(50);
        let path = fx.touch("c.txt");

        let report = fx.apply(&[FileEvent::created(&path), FileEvent::deleted(&path)]);

        assert_eq!(report.added, vec![path.clone()]);
        assert_eq!(report.removed, vec![path]);
        assert!(fx.registry.is_empty());
        fx.assert_consistent();
    }

    #[test]
    fn test_vanished_creation_is_dropped_silently() {
        let mut fx = Fixture::new(50);
        let path = fx.temp_dir.path().join("c.txt");

        let report = fx.apply(&[FileEvent::created(&path)]);

        assert!(report.is_clean());
        assert_eq!(report.skipped, vec![path]);
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_repeated_delete_is_harmless() {
        let mut fx = Fixture::new(50);
        let path = fx.touch("b.txt");
        fx.apply(&[FileEvent::created(&path)]);

        let report = fx.apply(&[FileEvent::deleted(&path), FileEvent::deleted(&path)]);
        assert_eq!(report.removed.len(), 1);
        assert!(report.failures.is_empty());
        fx.assert_consistent();
    }

    #[test]
    fn test_recreate_replaces_descriptor() {
        let mut fx = Fixture::new(50);
        let path = fx.touch("b.txt");
        fx.apply(&[FileEvent::created(&path)]);
        fx.apply(&[FileEvent::created(&path)]);

        assert_eq!(fx.registry.len(), 1);
        assert_eq!(fx.bridge.facility().registered().count(), 1);
        fx.assert_consistent();
    }

    #[test]
    fn test_rename_moves_watch() {
        let mut fx = Fixture::new(50);
        let old = fx.touch("old.txt");
        fx.apply(&[FileEvent::created(&old)]);
        let new = fx.temp_dir.path().join("new.txt");
        std::fs::rename(&old, &new).unwrap();

        fx.apply(&[
            FileEvent::new(FileEventKind::RenamedFrom, &old),
            FileEvent::new(FileEventKind::RenamedTo, &new),
        ]);

        assert!(!fx.registry.contains(&old));
        assert!(fx.registry.contains(&new));
        fx.assert_consistent();
    }

    #[test]
    fn test_other_kinds_do_not_touch_watch_set() {
        let mut fx = Fixture::new(50);
        let path = fx.touch("b.txt");

        let report = fx.apply(&[
            FileEvent::new(FileEventKind::Modified, &path),
            FileEvent::new(FileEventKind::MetadataChanged, &path),
        ]);
        assert!(report.added.is_empty());
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_registration_failure_does_not_stop_batch() {
        let mut fx = Fixture::new(50);
        let first = fx.touch("first");
        let second = fx.touch("second");

        fx.bridge.facility_mut().reject_registrations(true);
        let report = fx.apply(&[FileEvent::created(&first)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path(), Some(first.as_path()));

        fx.bridge.facility_mut().reject_registrations(false);
        let report = fx.apply(&[FileEvent::created(&second), FileEvent::deleted(&first)]);
        assert!(report.failures.is_empty());
        assert_eq!(fx.registry.snapshot_paths().len(), 1);
        fx.assert_consistent();
    }

    #[test]
    fn test_open_failure_is_collected_and_batch_continues() {
        let mut fx = Fixture::new(50);
        let unopenable = fx.temp_dir.path().join("x".repeat(1024));
        let ok = fx.touch("ok.txt");

        let report = fx.apply(&[FileEvent::created(&unopenable), FileEvent::created(&ok)]);

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], WatcherError::Acquire { .. }));
        assert_eq!(report.failures[0].path(), Some(unopenable.as_path()));
        assert!(report.skipped.is_empty());
        assert_eq!(report.added, vec![ok.clone()]);
        assert!(fx.registry.contains(&ok));
        fx.assert_consistent();
    }

    #[test]
    fn test_budget_checked_once_per_batch() {
        let mut fx = Fixture::new(1);
        let events: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| FileEvent::created(fx.touch(name)))
            .collect();

        let report = fx.apply(&events);
        assert_eq!(
            report.budget_warnings().cloned().collect::<Vec<_>>(),
            vec![Warning::BudgetExceeded {
                count: 3,
                threshold: 1
            }]
        );
    }
}
