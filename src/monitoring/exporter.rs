//! Prometheus Exporter
//!
//! Publishes window and queue metric snapshots in the Prometheus text format.

use std::fmt::Debug;
use std::hash::Hash;

use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};
use crate::mq::AdmissionQueue;
use crate::window::ExpiringWindow;

const NAMESPACE: &str = "admission";

/// Gauges refreshed from metric snapshots
///
/// Counters are exported as gauges because their values come from the
/// collectors' own atomics rather than from increments made here.
pub struct PrometheusExporter {
    registry: Registry,
    window_size: IntGaugeVec,
    window_capacity: IntGaugeVec,
    window_peak_size: IntGaugeVec,
    window_events: IntGaugeVec,
    queue_size: IntGaugeVec,
    queue_messages: IntGaugeVec,
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
        .map_err(|e| Error::Internal(format!("Invalid metric {}: {}", name, e)))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| Error::Internal(format!("Failed to register metric {}: {}", name, e)))?;
    Ok(gauge)
}

impl PrometheusExporter {
    /// Create an exporter with its own registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            window_size: gauge_vec(
                &registry,
                "window_size",
                "Keys currently held by the window",
                &["window"],
            )?,
            window_capacity: gauge_vec(
                &registry,
                "window_capacity",
                "Configured window capacity",
                &["window"],
            )?,
            window_peak_size: gauge_vec(
                &registry,
                "window_peak_size",
                "Largest size observed",
                &["window"],
            )?,
            window_events: gauge_vec(
                &registry,
                "window_events_total",
                "Window events by kind",
                &["window", "event"],
            )?,
            queue_size: gauge_vec(
                &registry,
                "queue_size",
                "Messages waiting in the queue",
                &["window"],
            )?,
            queue_messages: gauge_vec(
                &registry,
                "queue_messages_total",
                "Queue messages by outcome",
                &["window", "outcome"],
            )?,
            registry,
        })
    }

    /// Refresh the gauges of one window
    pub fn observe_window<K, V>(&self, window: &ExpiringWindow<K, V>)
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let name = window.name();
        let snapshot = window.metrics().snapshot();

        self.window_size
            .with_label_values(&[name])
            .set(window.len() as i64);
        self.window_capacity
            .with_label_values(&[name])
            .set(window.capacity() as i64);
        self.window_peak_size
            .with_label_values(&[name])
            .set(snapshot.peak_size as i64);

        for (event, value) in [
            ("admitted", snapshot.admitted),
            ("refreshed", snapshot.refreshed),
            ("rejected", snapshot.rejected),
            ("expired", snapshot.expired),
            ("removed", snapshot.removed),
            ("callback_failure", snapshot.callback_failures),
        ] {
            self.window_events
                .with_label_values(&[name, event])
                .set(value as i64);
        }
    }

    /// Refresh the gauges of a queue and its window
    pub fn observe_queue<K, V>(&self, queue: &AdmissionQueue<K, V>)
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.observe_window(queue.window());

        let name = queue.window().name();
        let snapshot = queue.metrics().snapshot();
        self.queue_size
            .with_label_values(&[name])
            .set(queue.queue_size() as i64);

        for (outcome, value) in [
            ("enqueued", snapshot.enqueued),
            ("not_admitted", snapshot.not_admitted),
            ("sent", snapshot.sent),
            ("send_failure", snapshot.send_failures),
            ("send_error", snapshot.send_errors),
        ] {
            self.queue_messages
                .with_label_values(&[name, outcome])
                .set(value as i64);
        }
    }

    /// Render all registered metrics in the text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics are not valid UTF-8: {}", e)))
    }

    /// Content type of [`encode`](Self::encode) output
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
