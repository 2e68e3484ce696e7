//! Pipeline Configuration
//!
//! YAML file layout:
//!
//! ```yaml
//! window:
//!   name: CMC
//!   capacity: 1000
//!   ttl_ms: 60000
//!   admission: strict
//! queue:
//!   capacity: 2000
//! ```
//!
//! Every field is optional and falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mq::QueueConfig;
use crate::window::WindowConfig;

/// Configuration of a window and the queue in front of it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub window: WindowConfig,
    pub queue: QueueConfig,
}

impl PipelineConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        self.queue.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::window::AdmissionMode;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn test_from_yaml_str() {
        let config = PipelineConfig::from_yaml_str(
            r#"
window:
  name: CMC
  capacity: 5
  ttl_ms: 1000
  admission: soft
queue:
  capacity: 6
"#,
        )
        .unwrap();

        assert_eq!(config.window.name, "CMC");
        assert_eq!(config.window.capacity, 5);
        assert_eq!(config.window.ttl, Duration::from_millis(1000));
        assert_eq!(config.window.admission, AdmissionMode::Soft);
        assert_eq!(config.queue.capacity, 6);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = PipelineConfig::from_yaml_str("window:\n  capacity: 3\n").unwrap();
        assert_eq!(config.window.capacity, 3);
        assert_eq!(config.window.ttl, crate::window::DEFAULT_TTL);
        assert_eq!(config.queue.capacity, crate::mq::DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert_matches!(
            PipelineConfig::from_yaml_str("window:\n  ttl_ms: 0\n"),
            Err(Error::Config(_))
        );
        assert_matches!(
            PipelineConfig::from_yaml_str("queue:\n  capacity: 0\n"),
            Err(Error::Config(_))
        );
        assert_matches!(
            PipelineConfig::from_yaml_str("window: [1, 2]"),
            Err(Error::Yaml(_))
        );
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("pipeline-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "window:\n  name: file\n").unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.window.name, "file");
        std::fs::remove_file(&path).unwrap();

        assert_matches!(PipelineConfig::from_file(&path), Err(Error::Io(_)));
    }
}
