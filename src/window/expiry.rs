//! Expiry Queue
//!
//! Concurrency-safe priority queue of [`TimedKey`]s ordered by deadline.
//!
//! # Design
//!
//! - Min-heap behind a `parking_lot::Mutex`, never held across an `.await`
//! - `tokio::sync::Notify` wakes the single waiter when the head may have changed
//! - Lookups by key are linear scans; the queue is bounded by the window capacity

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::timed_key::TimedKey;

/// Delay-ordered queue of timed keys
pub struct ExpiryQueue<K> {
    /// Min-heap by (deadline, seq)
    heap: Mutex<BinaryHeap<Reverse<TimedKey<K>>>>,
    /// Next insertion sequence number
    next_seq: AtomicU64,
    /// Signalled on push and refresh
    changed: Notify,
}

impl<K> Default for ExpiryQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ExpiryQueue<K> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    /// Create an empty queue with room for `capacity` keys
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
            next_seq: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    /// Push a new key whose clock starts now
    pub fn push(&self, key: K, ttl: Duration) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.push_item(TimedKey::new(key, ttl, seq));
    }

    /// Push an existing timed key
    pub fn push_item(&self, item: TimedKey<K>) {
        self.heap.lock().push(Reverse(item));
        self.changed.notify_one();
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Deadline of the soonest-expiring key
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.lock().peek().map(|Reverse(item)| item.deadline())
    }

    /// Pop every key whose deadline is at or before `now`, soonest first
    pub fn pop_due(&self, now: Instant) -> Vec<TimedKey<K>> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap
            .peek()
            .is_some_and(|Reverse(item)| item.is_expired(now))
        {
            if let Some(Reverse(item)) = heap.pop() {
                due.push(item);
            }
        }
        due
    }

    /// Suspend until the soonest-expiring key is due, without popping it
    pub async fn wait_until_due(&self) {
        loop {
            // Register interest before inspecting the head so a concurrent
            // push cannot slip between the check and the wait.
            let changed = self.changed.notified();
            match self.next_deadline() {
                Some(deadline) if deadline <= Instant::now() => return,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = changed => {}
                    }
                }
                None => changed.await,
            }
        }
    }

    /// Suspend until the soonest-expiring key is due, then pop and return it
    pub async fn take_next_expired(&self) -> TimedKey<K> {
        loop {
            self.wait_until_due().await;
            let mut heap = self.heap.lock();
            let now = Instant::now();
            if heap
                .peek()
                .is_some_and(|Reverse(item)| item.is_expired(now))
            {
                if let Some(Reverse(item)) = heap.pop() {
                    return item;
                }
            }
        }
    }
}

impl<K: PartialEq> ExpiryQueue<K> {
    /// Remove the entry tracking `key`
    pub fn remove_by_key(&self, key: &K) -> Option<TimedKey<K>> {
        let mut heap = self.heap.lock();
        take_matching(&mut heap, key)
    }

    /// Restart the clock of the entry tracking `key`
    ///
    /// Returns false if no entry tracks `key`.
    pub fn refresh_by_key(&self, key: &K) -> bool {
        let mut heap = self.heap.lock();
        match take_matching(&mut heap, key) {
            Some(mut item) => {
                item.refresh();
                heap.push(Reverse(item));
                drop(heap);
                self.changed.notify_one();
                true
            }
            None => false,
        }
    }

    /// Check if an entry tracks `key`
    pub fn contains_key(&self, key: &K) -> bool {
        self.heap
            .lock()
            .iter()
            .any(|Reverse(item)| item.key() == key)
    }
}

/// Remove the first heap entry for `key`, rebuilding heap order.
fn take_matching<K: PartialEq>(
    heap: &mut BinaryHeap<Reverse<TimedKey<K>>>,
    key: &K,
) -> Option<TimedKey<K>> {
    if !heap.iter().any(|Reverse(item)| item.key() == key) {
        return None;
    }

    let mut found = None;
    let rest: Vec<_> = std::mem::take(heap)
        .into_vec()
        .into_iter()
        .filter_map(|Reverse(item)| {
            if found.is_none() && item.key() == key {
                found = Some(item);
                None
            } else {
                Some(Reverse(item))
            }
        })
        .collect();
    *heap = BinaryHeap::from(rest);
    found
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_push_and_len() {
        let queue = ExpiryQueue::new();
        assert!(queue.is_empty());

        queue.push("a", TTL);
        queue.push("b", TTL);
        assert_eq!(queue.len(), 2);
        assert!(queue.contains_key(&"a"));
        assert!(!queue.contains_key(&"c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_due_in_deadline_then_fifo_order() {
        let queue = ExpiryQueue::new();
        queue.push("late", Duration::from_millis(300));
        queue.push("first", Duration::from_millis(100));
        queue.push("second", Duration::from_millis(100));

        assert!(queue.pop_due(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        let due: Vec<_> = queue
            .pop_due(Instant::now())
            .into_iter()
            .map(TimedKey::into_key)
            .collect();
        assert_eq!(due, vec!["first", "second"]);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_next_expired_waits_for_deadline() {
        let queue = ExpiryQueue::new();
        let start = Instant::now();
        queue.push("k1", Duration::from_millis(250));

        let item = queue.take_next_expired().await;
        assert_eq!(item.key(), &"k1");
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_next_expired_wakes_on_push() {
        let queue = Arc::new(ExpiryQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take_next_expired().await.into_key() })
        };

        // Let the waiter park on an empty queue
        tokio::task::yield_now().await;
        queue.push("late", Duration::from_millis(50));

        assert_eq!(waiter.await.unwrap(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_push_preempts_sleeping_waiter() {
        let queue = Arc::new(ExpiryQueue::new());
        queue.push("slow", Duration::from_secs(60));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take_next_expired().await.into_key() })
        };
        tokio::task::yield_now().await;

        let start = Instant::now();
        queue.push("fast", Duration::from_millis(10));
        assert_eq!(waiter.await.unwrap(), "fast");
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_by_key() {
        let queue = ExpiryQueue::new();
        queue.push("a", TTL);
        queue.push("b", TTL);
        queue.push("c", TTL);

        let removed = queue.remove_by_key(&"b").unwrap();
        assert_eq!(removed.key(), &"b");
        assert_eq!(queue.len(), 2);
        assert!(queue.remove_by_key(&"b").is_none());

        tokio::time::advance(TTL).await;
        let due: Vec<_> = queue
            .pop_due(Instant::now())
            .into_iter()
            .map(TimedKey::into_key)
            .collect();
        assert_eq!(due, vec!["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_by_key_reorders() {
        let queue = ExpiryQueue::new();
        queue.push("a", TTL);
        queue.push("b", TTL);

        tokio::time::advance(Duration::from_millis(700)).await;
        assert!(queue.refresh_by_key(&"a"));
        assert!(!queue.refresh_by_key(&"missing"));

        tokio::time::advance(Duration::from_millis(300)).await;
        let due: Vec<_> = queue
            .pop_due(Instant::now())
            .into_iter()
            .map(TimedKey::into_key)
            .collect();
        assert_eq!(due, vec!["b"]);

        tokio::time::advance(Duration::from_millis(700)).await;
        let due: Vec<_> = queue
            .pop_due(Instant::now())
            .into_iter()
            .map(TimedKey::into_key)
            .collect();
        assert_eq!(due, vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_single_entry() {
        let queue = ExpiryQueue::with_capacity(4);
        queue.push("a", TTL);
        for _ in 0..5 {
            assert!(queue.refresh_by_key(&"a"));
        }
        assert_eq!(queue.len(), 1);
    }
}
