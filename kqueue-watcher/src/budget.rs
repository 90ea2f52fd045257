//! Descriptor budget warnings.
//!
//! kqueue needs one open descriptor per watched file or directory, so large
//! trees quickly approach the process descriptor limit. Nothing here changes
//! behavior; it only tells the operator the backend is being pushed too far.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::DEFAULT_DESCRIPTOR_WARNING_THRESHOLD;

/// A recoverable condition reported to the host's logging boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    /// The watch set holds more descriptors than the configured threshold.
    BudgetExceeded { count: usize, threshold: usize },

    /// The descriptor table filled up while opening `path`.
    TooManyOpenFiles { path: PathBuf },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetExceeded { count, threshold } => write!(
                f,
                "kqueue watcher holds {count} open descriptors (threshold {threshold}); \
                 the kqueue backend is not suited to trees of this size"
            ),
            Self::TooManyOpenFiles { path } => write!(
                f,
                "too many open files while watching {}; the path is left unwatched \
                 and the kqueue backend may be unsuitable at this scale",
                path.display()
            ),
        }
    }
}

/// Warn when `count` exceeds `threshold`.
pub fn check(count: usize, threshold: usize) -> Option<Warning> {
    (count > threshold).then_some(Warning::BudgetExceeded { count, threshold })
}

/// Checks the watch-set size against a configured threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBudgetGuard {
    threshold: usize,
}

impl ResourceBudgetGuard {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Check `count` and log the warning, if any.
    pub fn check(&self, count: usize) -> Option<Warning> {
        let warning = check(count, self.threshold)?;
        warn!("{warning}");
        Some(warning)
    }
}

impl Default for ResourceBudgetGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTOR_WARNING_THRESHOLD)
    }
}
