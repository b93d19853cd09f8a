//! Benchmark utilities.

use mapstore_core::{MapStore, StoreMode};
use rand::Rng;

/// Generate random value data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a batch of distinct keys.
pub fn generate_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("bench-key-{i:08}").into_bytes())
        .collect()
}

/// Generate entries with the specified value size.
pub fn generate_entries(count: usize, value_size: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    generate_keys(count)
        .into_iter()
        .map(|key| (key, random_data(value_size)))
        .collect()
}

/// Write `entries` into `store`, replacing existing values.
pub fn load<S: MapStore>(store: &S, entries: &[(Vec<u8>, Vec<u8>)]) {
    for (key, value) in entries {
        store
            .store(key, value, StoreMode::Replace)
            .expect("Failed to load entry");
    }
}
