//! Property-Based Tests for the Memory Layer
//!
//! **Property: LRU bound.** For any sequence of writes the layer never holds
//! more than its capacity, and for write-only workloads the survivors are
//! exactly the most recently inserted keys.
//!
//! **Property: TTL visibility.** Entries without a TTL are never swept;
//! entries whose TTL has passed are never returned.

use std::collections::HashSet;
use std::time::Duration;

use futures::executor::block_on;
use nuvex_storage::{MemoryLayer, StorageLayer};
use proptest::prelude::*;
use serde_json::json;

/// Strategy for short key names; a small alphabet forces key reuse.
fn key_strategy() -> impl Strategy<Value = String> {
    (0u8..20).prop_map(|n| format!("k{n}"))
}

proptest! {
    #[test]
    fn prop_capacity_bound_holds(
        capacity in 1usize..16,
        keys in prop::collection::vec(key_strategy(), 0..100),
    ) {
        let layer = MemoryLayer::new(capacity);
        for (i, key) in keys.iter().enumerate() {
            block_on(layer.set(key, &json!(i), None)).unwrap();
            prop_assert!(layer.len() <= capacity);
        }
    }

    #[test]
    fn prop_survivors_are_most_recent_distinct_keys(
        capacity in 1usize..10,
        keys in prop::collection::vec(key_strategy(), 1..60),
    ) {
        let layer = MemoryLayer::new(capacity);
        for (i, key) in keys.iter().enumerate() {
            block_on(layer.set(key, &json!(i), None)).unwrap();
        }

        // Walk the write sequence backwards: the last `capacity` distinct
        // keys written are exactly the survivors.
        let mut expected: HashSet<&str> = HashSet::new();
        for key in keys.iter().rev() {
            if expected.len() == capacity {
                break;
            }
            expected.insert(key.as_str());
        }

        let mut survivors = block_on(layer.keys("*")).unwrap();
        survivors.sort();
        let mut expected: Vec<&str> = expected.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(survivors, expected);
    }

    #[test]
    fn prop_untimed_entries_survive_cleanup(
        keys in prop::collection::vec(key_strategy(), 0..40),
    ) {
        let layer = MemoryLayer::new(64);
        for key in &keys {
            block_on(layer.set(key, &json!(1), None)).unwrap();
        }
        prop_assert_eq!(layer.cleanup(), 0);
        for key in &keys {
            prop_assert!(block_on(layer.exists(key)).unwrap());
        }
    }

    #[test]
    fn prop_elapsed_ttl_is_never_visible(
        keys in prop::collection::vec(key_strategy(), 1..20),
    ) {
        let layer = MemoryLayer::new(64);
        for key in &keys {
            // A zero TTL is already elapsed by read time.
            block_on(layer.set(key, &json!(1), Some(Duration::ZERO))).unwrap();
        }
        for key in &keys {
            prop_assert!(block_on(layer.get(key)).unwrap().is_none());
            prop_assert!(!block_on(layer.exists(key)).unwrap());
        }
    }

    #[test]
    fn prop_increment_accumulates(
        deltas in prop::collection::vec(-1000i64..1000, 1..50),
    ) {
        let layer = MemoryLayer::new(8);
        let mut expected = 0i64;
        for delta in &deltas {
            expected += delta;
            let got = block_on(layer.increment("counter", *delta, None)).unwrap();
            prop_assert_eq!(got, expected);
        }
        prop_assert_eq!(block_on(layer.get("counter")).unwrap(), Some(json!(expected)));
    }
}
