//! Timed Key
//!
//! A key wrapped with a time-to-live, ordered by expiration deadline.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::time::Instant;

/// A key with a remaining time-to-live
///
/// Ordering is by deadline (`created_at + ttl`), soonest first. Entries with
/// the same deadline are ordered by `seq`, the order in which they were first
/// inserted into the expiry queue.
#[derive(Debug, Clone)]
pub struct TimedKey<K> {
    key: K,
    ttl: Duration,
    created_at: Instant,
    seq: u64,
}

impl<K> TimedKey<K> {
    /// Create a timed key whose clock starts now
    pub fn new(key: K, ttl: Duration, seq: u64) -> Self {
        Self {
            key,
            ttl,
            created_at: Instant::now(),
            seq,
        }
    }

    /// Get the wrapped key
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Consume and return the wrapped key
    pub fn into_key(self) -> K {
        self.key
    }

    /// Get the configured time-to-live
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get the insertion sequence number
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Instant at which the key becomes eligible for expiry
    #[inline]
    pub fn deadline(&self) -> Instant {
        self.created_at + self.ttl
    }

    /// Signed remaining time at `now`; negative once the key is overdue
    pub fn remaining(&self, now: Instant) -> chrono::Duration {
        let deadline = self.deadline();
        if now <= deadline {
            to_signed(deadline - now)
        } else {
            -to_signed(now - deadline)
        }
    }

    /// Check if the key is eligible for expiry at `now`
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline() <= now
    }

    /// Restart the clock, keeping key, ttl and insertion order
    pub fn refresh(&mut self) {
        self.created_at = Instant::now();
    }
}

fn to_signed(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

impl<K> PartialEq for TimedKey<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K> Eq for TimedKey<K> {}

impl<K> PartialOrd for TimedKey<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for TimedKey<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline()
            .cmp(&other.deadline())
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timed_key_remaining() {
        let item = TimedKey::new("k1", Duration::from_millis(1000), 0);
        let now = Instant::now();
        assert_eq!(item.remaining(now), chrono::Duration::milliseconds(1000));
        assert!(!item.is_expired(now));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(
            item.remaining(Instant::now()),
            chrono::Duration::milliseconds(600)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_key_remaining_goes_negative() {
        let item = TimedKey::new("k1", Duration::from_millis(100), 0);
        tokio::time::advance(Duration::from_millis(150)).await;

        let now = Instant::now();
        assert!(item.is_expired(now));
        assert_eq!(item.remaining(now), chrono::Duration::milliseconds(-50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_key_expires_exactly_at_deadline() {
        let item = TimedKey::new("k1", Duration::from_millis(100), 0);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(item.is_expired(Instant::now()));
        assert_eq!(item.remaining(Instant::now()), chrono::Duration::zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_key_refresh_resets_clock() {
        let mut item = TimedKey::new("k1", Duration::from_millis(1000), 7);
        tokio::time::advance(Duration::from_millis(700)).await;
        item.refresh();

        assert_eq!(item.key(), &"k1");
        assert_eq!(item.seq(), 7);
        assert_eq!(item.ttl(), Duration::from_millis(1000));
        assert_eq!(
            item.remaining(Instant::now()),
            chrono::Duration::milliseconds(1000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_key_ordering() {
        let long = TimedKey::new("long", Duration::from_millis(500), 0);
        let short = TimedKey::new("short", Duration::from_millis(100), 1);
        assert!(short < long);

        // Same deadline: insertion order wins
        let first = TimedKey::new("a", Duration::from_millis(100), 2);
        let second = TimedKey::new("b", Duration::from_millis(100), 3);
        assert!(first < second);
        assert_ne!(first, second);
    }
}
