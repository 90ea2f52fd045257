//! Configuration types for the kqueue watcher.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Watch-set size above which a budget warning is emitted.
pub const DEFAULT_DESCRIPTOR_WARNING_THRESHOLD: usize = 50;

/// Maximum number of kernel events collected per `kevent` call.
pub const DEFAULT_DRAIN_CAPACITY: usize = 64;

/// Configuration for a kqueue watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Root of the watched tree (used by the default discovery).
    pub root: Option<PathBuf>,

    /// Number of open watch descriptors tolerated before warning.
    pub descriptor_warning_threshold: usize,

    /// Size of the event buffer handed to the kernel on each drain call.
    pub drain_capacity: usize,

    /// Capacity of the downstream event channel.
    pub channel_capacity: usize,

    /// Maximum depth to recurse during discovery (None = unlimited).
    pub max_depth: Option<usize>,

    /// Whether discovery follows symbolic links.
    pub follow_symlinks: bool,
}

impl WatcherConfig {
    /// Create a config rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Set the descriptor warning threshold.
    pub fn with_warning_threshold(mut self, threshold: usize) -> Self {
        self.descriptor_warning_threshold = threshold;
        self
    }

    /// Set the drain buffer capacity.
    pub fn with_drain_capacity(mut self, capacity: usize) -> Self {
        self.drain_capacity = capacity;
        self
    }

    /// Set the maximum discovery depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// Parse a config from TOML. Missing keys fall back to defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| WatcherError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Reject values the watcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.drain_capacity == 0 {
            return Err(WatcherError::Config(
                "drain_capacity must be greater than zero".to_string(),
            ));
        }
        if self.drain_capacity > libc::c_int::MAX as usize {
            return Err(WatcherError::Config(format!(
                "drain_capacity must not exceed {}",
                libc::c_int::MAX
            )));
        }
        if self.channel_capacity == 0 {
            return Err(WatcherError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            root: None,
            descriptor_warning_threshold: DEFAULT_DESCRIPTOR_WARNING_THRESHOLD,
            drain_capacity: DEFAULT_DRAIN_CAPACITY,
            channel_capacity: 1000,
            max_depth: None,
            follow_symlinks: false,
        }
    }
}
