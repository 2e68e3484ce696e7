//! Window Metrics Collection
//!
//! Lock-free counters describing admission, rejection and eviction activity.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Window metrics collector
#[derive(Debug, Default)]
pub struct WindowMetrics {
    // Admission
    admitted: AtomicU64,
    refreshed: AtomicU64,
    rejected: AtomicU64,

    // Release
    expired: AtomicU64,
    removed: AtomicU64,

    // Collaborators
    callback_failures: AtomicU64,

    // Highest size observed after an admission
    peak_size: AtomicU64,
}

impl WindowMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self, size_after: usize) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.peak_size
            .fetch_max(size_after as u64, Ordering::Relaxed);
    }

    pub fn record_refreshed(&self) {
        self.refreshed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn refreshed(&self) -> u64 {
        self.refreshed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }

    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }

    pub fn peak_size(&self) -> u64 {
        self.peak_size.load(Ordering::Relaxed)
    }

    /// Fraction of put attempts for new keys that were refused
    pub fn rejection_ratio(&self) -> f64 {
        let rejected = self.rejected() as f64;
        let total = rejected + self.admitted() as f64;
        if total == 0.0 {
            0.0
        } else {
            rejected / total
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> WindowMetricsSnapshot {
        WindowMetricsSnapshot {
            admitted: self.admitted(),
            refreshed: self.refreshed(),
            rejected: self.rejected(),
            expired: self.expired(),
            removed: self.removed(),
            callback_failures: self.callback_failures(),
            peak_size: self.peak_size(),
            rejection_ratio: self.rejection_ratio(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.admitted.store(0, Ordering::Relaxed);
        self.refreshed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.expired.store(0, Ordering::Relaxed);
        self.removed.store(0, Ordering::Relaxed);
        self.callback_failures.store(0, Ordering::Relaxed);
        self.peak_size.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of window metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowMetricsSnapshot {
    pub admitted: u64,
    pub refreshed: u64,
    pub rejected: u64,
    pub expired: u64,
    pub removed: u64,
    pub callback_failures: u64,
    pub peak_size: u64,
    pub rejection_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================
