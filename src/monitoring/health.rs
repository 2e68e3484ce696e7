//! Health Checks
//!
//! Liveness and readiness for the pipeline. Readiness additionally requires
//! every watched window to have a running expiration task.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::window::ExpiringWindow;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is degraded but operational
    Degraded,
    /// Service is unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Result of a single check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the checks
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

type WindowCheck = Box<dyn Fn() -> HealthCheckResult + Send + Sync>;

/// Health check manager
pub struct HealthCheck {
    start_time: Instant,
    live: AtomicBool,
    ready: AtomicBool,
    /// Per-window readiness checks
    window_checks: RwLock<Vec<WindowCheck>>,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            window_checks: RwLock::new(Vec::new()),
        }
    }

    /// Require `window` to be running for the service to be ready
    pub fn watch_window<K, V>(&self, window: &ExpiringWindow<K, V>)
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let window = window.clone();
        let name = format!("window:{}", window.name());
        self.window_checks.write().push(Box::new(move || {
            if !window.is_running() {
                HealthCheckResult::unhealthy(&name, "expiration task not running")
            } else if window.is_full() {
                HealthCheckResult::degraded(&name, "window is full")
            } else {
                HealthCheckResult::healthy(&name)
            }
        }));
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    /// Ready flag set and every watched window operational
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
            && self
                .window_checks
                .read()
                .iter()
                .all(|check| check().status.is_operational())
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Get liveness response
    pub fn liveness_check(&self) -> HealthCheckResult {
        if self.is_live() {
            HealthCheckResult::healthy("liveness")
        } else {
            HealthCheckResult::unhealthy("liveness", "Service not live")
        }
    }

    /// Get readiness response; unhealthy until ready and every watched
    /// window is running
    pub fn readiness_check(&self) -> HealthCheckResult {
        if self.is_ready() {
            HealthCheckResult::healthy("readiness")
        } else {
            HealthCheckResult::unhealthy("readiness", "Service not ready")
        }
    }

    /// Run all health checks
    pub fn check_all(&self) -> HealthResponse {
        let mut checks = vec![self.liveness_check(), self.readiness_check()];
        checks.extend(self.window_checks.read().iter().map(|check| check()));
        HealthResponse::new(checks, self.uptime())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowConfig;

    fn window(capacity: usize) -> ExpiringWindow<String, u32> {
        ExpiringWindow::new(WindowConfig::new("health", capacity, Duration::from_secs(1))).unwrap()
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Degraded.is_healthy());
        assert!(!HealthStatus::Unhealthy.is_operational());
        assert_eq!(HealthStatus::Degraded.to_string(), "Degraded");
    }

    #[test]
    fn test_health_response_takes_worst_status() {
        let checks = vec![
            HealthCheckResult::healthy("a"),
            HealthCheckResult::degraded("b", "slow"),
        ];
        let response = HealthResponse::new(checks, Duration::from_secs(60));
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.uptime_seconds, 60);
    }

    #[test]
    fn test_flags() {
        let health = HealthCheck::new();
        assert!(health.is_live());
        assert!(!health.is_ready());

        health.set_ready(true);
        assert!(health.is_ready());

        health.set_live(false);
        assert_eq!(health.liveness_check().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_readiness_check_reports_reason() {
        let health = HealthCheck::new();
        let result = health.readiness_check();
        assert_eq!(result.name, "readiness");
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.message.as_deref(), Some("Service not ready"));

        health.set_ready(true);
        let result = health.readiness_check();
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.message.is_none());
        assert_eq!(health.liveness_check().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_follows_window_lifecycle() {
        let health = HealthCheck::new();
        let window = window(2);
        health.watch_window(&window);
        health.set_ready(true);

        // Not started yet
        assert!(!health.is_ready());

        window.start().unwrap();
        assert!(health.is_ready());

        window.stop().await;
        assert!(!health.is_ready());
        assert_eq!(health.check_all().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_full_window_is_degraded_but_ready() {
        let health = HealthCheck::new();
        let window = window(1);
        window.start().unwrap();
        window.put("k1".to_string(), 1).unwrap();
        health.watch_window(&window);
        health.set_ready(true);

        assert!(health.is_ready());
        let response = health.check_all();
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.checks.len(), 3);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("window:health"));
    }
}
