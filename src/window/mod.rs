//! Expiring Admission Window
//!
//! Capacity-bounded key/value store whose entries expire after a fixed TTL.
//! A key occupies one slot from admission until it is removed or expires.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          ExpiringWindow                                  │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  put / remove ──▶ window lock ──┬──▶ DashMap<K, V>   (lock-free reads)   │
//! │                                 └──▶ ExpiryQueue<K>  (deadline order)    │
//! │                                              │                           │
//! │                               background expiration task                 │
//! │                                              │                           │
//! │              reject callback ◀── full    expire callback ◀── evicted     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! Put a message into the window before processing it and remove it once
//! processed. When the window is full, new keys are refused and the reject
//! callback is the place to hand the message to a guaranteed-delivery path.

mod callback;
mod config;
mod expiring;
mod expiry;
mod metrics;
mod timed_key;

#[cfg(test)]
mod proptest;

pub use callback::{CallbackKind, WindowCallback};
pub use config::{AdmissionMode, WindowConfig};
pub use expiring::{ExpiringWindow, SharedCallback, WindowBuilder};
pub use expiry::ExpiryQueue;
pub use metrics::{WindowMetrics, WindowMetricsSnapshot};
pub use timed_key::TimedKey;

use std::time::Duration;

/// Default window capacity
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default time-to-live of an admitted key
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Longest accepted time-to-live (100 years); deadlines are computed as
/// `Instant + ttl`, which must not overflow
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(DEFAULT_CAPACITY > 0);
        assert!(!DEFAULT_TTL.is_zero());
        assert!(DEFAULT_TTL <= MAX_TTL);
    }
}
