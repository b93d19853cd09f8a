//! Cross-crate integration test helpers.
//!
//! Provides a harness that runs operations against any [`MapStore`] and
//! checks every outcome against an in-memory model.

use crate::fixtures::CountingEngine;
use crate::generators::StoreOp;
use mapstore_core::{CoreError, MapStore, StoreMode};
use std::collections::HashMap;

/// A test harness that mirrors a store in a `HashMap`.
pub struct ModelHarness<'a, S: MapStore> {
    /// The store under test.
    pub store: &'a S,
    /// Expected contents.
    model: HashMap<Vec<u8>, Vec<u8>>,
}

impl<'a, S: MapStore> ModelHarness<'a, S> {
    /// Creates a harness over an empty store.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            model: HashMap::new(),
        }
    }

    /// Applies `op` to the store and checks the outcome against the model.
    pub fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::Store { key, value, mode } => self.store_and_verify(key, value, *mode),
            StoreOp::Fetch { key } => {
                self.fetch_and_verify(key);
            }
            StoreOp::Delete { key } => self.delete_and_verify(key),
        }
    }

    /// Stores an entry and checks the outcome against the model.
    pub fn store_and_verify(&mut self, key: &[u8], value: &[u8], mode: StoreMode) {
        let present = self.model.contains_key(key);
        let result = self.store.store(key, value, mode);
        match mode {
            StoreMode::Insert => {
                assert_eq!(result, Ok(!present), "insert outcome for {key:?}");
                if !present {
                    self.model.insert(key.to_vec(), value.to_vec());
                }
            }
            StoreMode::Replace => {
                assert_eq!(result, Ok(true), "replace outcome for {key:?}");
                self.model.insert(key.to_vec(), value.to_vec());
            }
            StoreMode::Modify if present => {
                assert_eq!(result, Ok(true), "modify outcome for {key:?}");
                self.model.insert(key.to_vec(), value.to_vec());
            }
            StoreMode::Modify => match result {
                Err(CoreError::Store { source, .. }) => assert!(source.is_not_found()),
                other => panic!("modify of missing key {key:?} returned {other:?}"),
            },
            StoreMode::InsertDup => panic!("the model does not track duplicate keys"),
        }
    }

    /// Fetches an entry and checks it against the model.
    pub fn fetch_and_verify(&self, key: &[u8]) -> Option<Vec<u8>> {
        match (self.store.fetch(key), self.model.get(key)) {
            (Ok(actual), Some(expected)) => {
                assert_eq!(&actual, expected, "value mismatch for {key:?}");
                Some(actual)
            }
            (Err(err), None) => {
                assert!(err.is_no_entry(), "fetch of missing {key:?} returned {err}");
                None
            }
            (actual, expected) => {
                panic!("fetch of {key:?} returned {actual:?}, model has {expected:?}")
            }
        }
    }

    /// Deletes an entry and checks the outcome against the model.
    pub fn delete_and_verify(&mut self, key: &[u8]) {
        let result = self.store.delete(key);
        if self.model.remove(key).is_some() {
            assert_eq!(result, Ok(()), "delete of {key:?}");
        } else {
            assert!(
                result.as_ref().is_err_and(CoreError::is_no_entry),
                "delete of missing {key:?} returned {result:?}"
            );
        }
    }

    /// Checks that the store holds exactly the model's entries, visiting
    /// each once.
    pub fn verify_all(&self) {
        let mut seen = HashMap::new();
        for entry in self.store.entries().expect("Failed to iterate") {
            let (key, value) = entry.expect("Failed to read entry");
            assert!(
                seen.insert(key.clone(), value).is_none(),
                "entry {key:?} visited twice"
            );
        }
        assert_eq!(seen, self.model, "store contents differ from model");
    }

    /// Returns the count of tracked entries.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

/// Asserts that every token the engine handed out was released exactly
/// once.
pub fn assert_released_exactly_once(engine: &CountingEngine) {
    assert!(
        engine.released_at_most_once(),
        "a token was released more than once"
    );
    let leaked = engine.leaked();
    assert!(leaked.is_empty(), "tokens never released: {leaked:?}");
    assert_eq!(engine.live_tokens(), 0, "engine still holds live tokens");
}
