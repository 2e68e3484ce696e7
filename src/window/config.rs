//! Window Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DEFAULT_CAPACITY, DEFAULT_TTL, MAX_TTL};
use crate::error::{Error, Result};

/// How the capacity check is sequenced with the table update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionMode {
    /// Capacity is checked and reserved under the window lock; the size
    /// never exceeds the capacity.
    #[default]
    Strict,
    /// Capacity is checked before taking the lock; concurrent admissions
    /// may transiently overshoot the capacity.
    Soft,
}

/// Expiring window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window name, used in logs and metrics
    pub name: String,
    /// Maximum number of in-flight keys
    pub capacity: usize,
    /// Time-to-live of an admitted key
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    /// Admission sequencing
    pub admission: AdmissionMode,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
            admission: AdmissionMode::default(),
        }
    }
}

impl WindowConfig {
    /// Create a strict-admission config
    pub fn new(name: impl Into<String>, capacity: usize, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            capacity,
            ttl,
            admission: AdmissionMode::Strict,
        }
    }

    /// Set the admission mode
    pub fn with_admission(mut self, admission: AdmissionMode) -> Self {
        self.admission = admission;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("window name must not be empty".to_string()));
        }
        if self.capacity == 0 {
            return Err(Error::Config(format!(
                "window '{}': capacity must be greater than zero",
                self.name
            )));
        }
        if self.ttl.is_zero() {
            return Err(Error::Config(format!(
                "window '{}': ttl must be greater than zero",
                self.name
            )));
        }
        if self.ttl > MAX_TTL || tokio::time::Instant::now().checked_add(self.ttl).is_none() {
            return Err(Error::Config(format!(
                "window '{}': ttl must not exceed {}s",
                self.name,
                MAX_TTL.as_secs()
            )));
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
