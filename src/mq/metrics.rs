//! Admission Queue Metrics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Queue metrics collector
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    not_admitted: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    send_errors: AtomicU64,
}

impl QueueMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_admitted(&self) {
        self.not_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Sender returned a status other than the success code
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Sender returned an error
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn not_admitted(&self) -> u64 {
        self.not_admitted.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            enqueued: self.enqueued(),
            not_admitted: self.not_admitted(),
            sent: self.sent(),
            send_failures: self.send_failures(),
            send_errors: self.send_errors(),
        }
    }
}

/// Snapshot of queue metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMetricsSnapshot {
    pub enqueued: u64,
    pub not_admitted: u64,
    pub sent: u64,
    pub send_failures: u64,
    pub send_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = QueueMetrics::new();
        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_not_admitted();
        metrics.record_sent();
        metrics.record_send_failure();
        metrics.record_send_error();

        assert_eq!(
            metrics.snapshot(),
            QueueMetricsSnapshot {
                enqueued: 2,
                not_admitted: 1,
                sent: 1,
                send_failures: 1,
                send_errors: 1,
            }
        );
    }
}
