//! Property-Based Tests for the Expiring Window
//!
//! # Test Properties
//!
//! 1. **Deadline Order**: timed keys sort by deadline, ties by insertion
//! 2. **Model Agreement**: any sequence of put/remove/advance matches a
//!    reference model (size, membership, values, admission results)
//! 3. **Capacity Bound**: strict admission never exceeds the capacity

#![cfg(test)]

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use super::{ExpiringWindow, ExpiryQueue, TimedKey, WindowConfig};

const TTL_MS: u64 = 1000;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u32),
    Remove(u8),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..8, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        2 => (0u8..8).prop_map(Op::Remove),
        2 => (1u64..700).prop_map(Op::Advance),
    ]
}

// =============================================================================
// Ordering Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: popping due keys yields ascending (ttl, insertion) order.
    #[test]
    fn prop_pop_due_is_deadline_then_fifo(ttls in prop::collection::vec(1u64..50, 1..40)) {
        let rt = paused_runtime();
        let popped = rt.block_on(async {
            let queue = ExpiryQueue::new();
            for (i, ttl) in ttls.iter().enumerate() {
                queue.push(i, Duration::from_millis(*ttl));
            }
            tokio::time::advance(Duration::from_millis(50)).await;
            queue
                .pop_due(Instant::now())
                .into_iter()
                .map(TimedKey::into_key)
                .collect::<Vec<_>>()
        });

        let mut expected: Vec<usize> = (0..ttls.len()).collect();
        expected.sort_by_key(|&i| (ttls[i], i));
        prop_assert_eq!(popped, expected);
    }

    /// Property: removing keys leaves exactly the others in the queue.
    #[test]
    fn prop_remove_by_key_leaves_no_stale_entry(
        count in 1usize..30,
        remove in prop::collection::vec(0usize..30, 0..30),
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let queue = ExpiryQueue::new();
            for i in 0..count {
                queue.push(i, Duration::from_millis(10));
            }
            let mut live: std::collections::BTreeSet<usize> = (0..count).collect();
            for key in &remove {
                let was_live = live.remove(key);
                assert_eq!(queue.remove_by_key(key).is_some(), was_live);
            }
            assert_eq!(queue.len(), live.len());

            tokio::time::advance(Duration::from_millis(10)).await;
            let popped: Vec<_> = queue
                .pop_due(Instant::now())
                .into_iter()
                .map(TimedKey::into_key)
                .collect();
            assert_eq!(popped, live.into_iter().collect::<Vec<_>>());
        });
    }
}

// =============================================================================
// Model Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the window agrees with a simple model and never exceeds
    /// its capacity.
    #[test]
    fn prop_window_matches_model(
        capacity in 1usize..6,
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let window: ExpiringWindow<u8, u32> = ExpiringWindow::new(WindowConfig::new(
                "model",
                capacity,
                Duration::from_millis(TTL_MS),
            ))
            .unwrap();
            window.start().unwrap();

            // key -> (value, deadline)
            let mut model: HashMap<u8, (u32, Instant)> = HashMap::new();
            let ttl = Duration::from_millis(TTL_MS);

            for op in ops {
                match op {
                    Op::Put(k, v) => {
                        let now = Instant::now();
                        let expected = if model.contains_key(&k) || model.len() < capacity {
                            model.insert(k, (v, now + ttl));
                            true
                        } else {
                            false
                        };
                        assert_eq!(window.put(k, v).unwrap(), expected);
                    }
                    Op::Remove(k) => {
                        let expected = model.remove(&k).map(|(v, _)| v);
                        assert_eq!(window.remove(&k), expected);
                    }
                    Op::Advance(ms) => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        for _ in 0..4 {
                            tokio::task::yield_now().await;
                        }
                        let now = Instant::now();
                        model.retain(|_, (_, deadline)| *deadline > now);
                    }
                }

                assert!(window.len() <= capacity);
                assert_eq!(window.len(), model.len());
                for (k, (v, _)) in &model {
                    assert_eq!(window.get(k).unwrap(), Some(*v));
                }
            }

            window.stop().await;
        });
    }
}
