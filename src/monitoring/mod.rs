//! Observability
//!
//! Prometheus exposition of window and queue metrics, plus liveness and
//! readiness checks for the host process.

mod exporter;
mod health;

pub use exporter::PrometheusExporter;
pub use health::{HealthCheck, HealthCheckResult, HealthResponse, HealthStatus};
