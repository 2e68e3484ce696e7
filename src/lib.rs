//! Admission Window - Expiring, capacity-bounded backpressure
//!
//! Limits how many messages are in flight towards a downstream system. A
//! message occupies a slot in an [`ExpiringWindow`] from admission until it is
//! processed or until its TTL elapses, whichever comes first. When the window
//! is full, new messages are refused and handed to a reject callback.
//!
//! # Architecture
//!
//! ```text
//! Producers ──▶ AdmissionQueue ──▶ ExpiringWindow (slots, TTL)
//!                    │                    ▲
//!                    ▼                    │ remove on success
//!                  FIFO ──▶ Consumers ──▶ MessageSender
//! ```
//!
//! # Modules
//!
//! - [`window`] - Expiring window, expiry queue and callbacks
//! - [`mq`] - Admission queue and sender contract
//! - [`config`] - YAML pipeline configuration
//! - [`monitoring`] - Prometheus exporter and health checks
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use admission_window::{ExpiringWindow, WindowConfig};
//!
//! # async fn run() -> admission_window::Result<()> {
//! let config = WindowConfig::new("CMC", 1000, Duration::from_secs(60));
//! let window = ExpiringWindow::<String, String>::builder(config)
//!     .on_reject(|key: &String, _: &String| -> anyhow::Result<()> {
//!         tracing::info!(%key, "Handing off to guaranteed delivery");
//!         Ok(())
//!     })
//!     .build()?;
//! window.start()?;
//!
//! if window.put("msg-1".to_string(), "hello".to_string())? {
//!     // process, then release the slot
//!     window.remove(&"msg-1".to_string());
//! }
//! window.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod monitoring;
pub mod mq;
pub mod window;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use mq::{sender_fn, AdmissionQueue, MessageSender, QueueConfig};
pub use window::{AdmissionMode, ExpiringWindow, WindowCallback, WindowConfig};
