//! # Kqueue Watcher
//!
//! This crate is the kqueue backend of the Codex file watcher. It turns
//! `EVFILT_VNODE` notifications into file events for a set of watched files
//! and directories on macOS and the BSDs.
//!
//! kqueue has no recursive or "directory contents changed" event, so every
//! watched file and directory costs one open descriptor. The crate owns that
//! bookkeeping: opening and registering descriptors, draining ready events,
//! and adding or releasing descriptors as the tree changes shape.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Kqueue Watcher                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EventLoopAdapter ──► KernelEventBridge ──► Classifier (host)   │
//! │                            │                     │              │
//! │                            ▼                     ▼              │
//! │                    WatchSetRegistry ◄──── WatchMaintenance      │
//! │                                                  │              │
//! │                                                  ▼              │
//! │                                       ResourceBudgetGuard       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod bridge;
pub mod budget;
pub mod config;
pub mod error;
pub mod event;
pub mod facility;
pub mod handle;
pub mod host;
pub mod loopback;
pub mod maintenance;
pub mod registry;
pub mod snapshot;
pub mod watcher;

pub use adapter::{EventLoopAdapter, spawn_with_channel};
pub use bridge::{Drain, KernelEventBridge};
pub use budget::{ResourceBudgetGuard, Warning};
pub use config::WatcherConfig;
pub use error::{Result, WatcherError};
pub use event::{FileEvent, FileEventKind, RawKernelEvent, VnodeEvents};
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub use facility::Kqueue;
pub use facility::{EventFacility, FacilityEvent};
pub use handle::{AcquireError, AcquireOutcome, WatchHandle};
pub use host::{Classifier, PathDiscovery};
pub use loopback::{LoopbackFacility, LoopbackInjector};
pub use maintenance::{MaintenanceReport, WatchMaintenance};
pub use registry::WatchSetRegistry;
pub use snapshot::DirectorySnapshot;
pub use watcher::{DrainCycle, KqueueWatcher, WatcherStats};
