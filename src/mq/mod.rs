//! Admission Queue
//!
//! Producer/consumer FIFO throttled by an [`ExpiringWindow`](crate::window::ExpiringWindow).
//!
//! ```text
//! producer ──enqueue──▶ window.offer ──admitted──▶ FIFO ──▶ consumer
//!                           │                               │
//!                        rejected                     sender.send
//!                           ▼                               │
//!                    reject callback            success ──▶ window.remove
//! ```
//!
//! A message whose send fails keeps its window slot until the TTL elapses,
//! which bounds the number of in-flight messages towards a slow gateway.

mod metrics;
mod queue;
mod sender;

pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use queue::{AdmissionQueue, KeyFn, QueueConfig};
pub use sender::{sender_fn, MessageSender, SenderFn};

/// Default FIFO capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
