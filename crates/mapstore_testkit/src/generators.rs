//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values, store modes and whole operation
//! sequences.

use mapstore_core::{HashFunction, StoreMode};
use proptest::prelude::*;
use std::collections::HashMap;

/// A single store operation, applied by [`crate::ModelHarness`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Write `value` under `key` with `mode`.
    Store {
        /// Key.
        key: Vec<u8>,
        /// Value.
        value: Vec<u8>,
        /// Store mode.
        mode: StoreMode,
    },
    /// Read `key`.
    Fetch {
        /// Key.
        key: Vec<u8>,
    },
    /// Delete `key`.
    Delete {
        /// Key.
        key: Vec<u8>,
    },
}

/// Strategy for generating valid keys (never empty).
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..32)
}

/// Strategy for generating values (arbitrary bytes, possibly empty).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for the single-entry store modes.
///
/// `InsertDup` is left out: it breaks the one-value-per-key model.
pub fn store_mode_strategy() -> impl Strategy<Value = StoreMode> {
    prop_oneof![
        Just(StoreMode::Insert),
        Just(StoreMode::Replace),
        Just(StoreMode::Modify),
    ]
}

/// Strategy for the hash functions the in-memory engine supports.
pub fn hash_function_strategy() -> impl Strategy<Value = HashFunction> {
    prop::sample::select(
        HashFunction::ALL
            .into_iter()
            .filter(|hash| !matches!(hash, HashFunction::Md5 | HashFunction::Sha1))
            .collect::<Vec<_>>(),
    )
}

/// Strategy for a map of distinct entries.
pub fn entries_strategy(max_entries: usize) -> impl Strategy<Value = HashMap<Vec<u8>, Vec<u8>>> {
    prop::collection::hash_map(key_strategy(), value_strategy(), 0..max_entries)
}

/// Strategy for one operation over a small key space, so that sequences
/// revisit keys.
pub fn store_op_strategy(key_space: usize) -> impl Strategy<Value = StoreOp> {
    let key = (0..key_space.max(1)).prop_map(|i| format!("key-{i}").into_bytes());
    prop_oneof![
        3 => (key.clone(), value_strategy(), store_mode_strategy())
            .prop_map(|(key, value, mode)| StoreOp::Store { key, value, mode }),
        2 => key.clone().prop_map(|key| StoreOp::Fetch { key }),
        1 => key.prop_map(|key| StoreOp::Delete { key }),
    ]
}

/// Strategy for a sequence of operations.
pub fn op_sequence_strategy(key_space: usize, max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(key_space), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_keys_are_never_empty(key in key_strategy()) {
            prop_assert!(!key.is_empty());
        }

        #[test]
        fn test_hash_functions_are_supported(hash in hash_function_strategy(), key in key_strategy()) {
            prop_assert!(hash.hash(&key).is_ok());
        }

        #[test]
        fn test_ops_stay_in_key_space(ops in op_sequence_strategy(4, 32)) {
            for op in ops {
                let key = match op {
                    StoreOp::Store { key, .. } | StoreOp::Fetch { key } | StoreOp::Delete { key } => key,
                };
                let text = String::from_utf8(key).unwrap();
                let index: usize = text.trim_start_matches("key-").parse().unwrap();
                prop_assert!(index < 4);
            }
        }
    }
}
