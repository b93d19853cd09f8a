//! Stress tests for mapstore.
//!
//! These helpers drive pools, synchronized stores and duplicated handles
//! from many threads at once.

use mapstore_core::{HandlePool, MapStore, StoreHandle, StoreMode, SynchronizedStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform, split across threads.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl StressConfig {
    /// Threads actually spawned; a zero thread count runs one.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.threads.max(1)
    }

    /// Operations each worker performs.
    #[must_use]
    pub fn ops_per_thread(&self) -> usize {
        self.operations / self.worker_threads()
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            key_count: 1_000,
        }
    }
}

fn stress_key(index: usize) -> Vec<u8> {
    format!("stress-{index}").into_bytes()
}

struct Tally {
    successful: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl Tally {
    fn new() -> Self {
        Self {
            successful: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn record<T, E>(successful: &AtomicUsize, failed: &AtomicUsize, result: Result<T, E>) {
        match result {
            Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn finish(self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Run a pool checkout stress test: each operation checks a handle out,
/// writes and reads one key, and returns it.
pub fn stress_pool_checkouts(pool: Arc<HandlePool>, config: &StressConfig) -> StressTestResult {
    let tally = Tally::new();
    let ops_per_thread = config.ops_per_thread();
    let start = Instant::now();

    let handles: Vec<_> = (0..config.worker_threads())
        .map(|t| {
            let pool = Arc::clone(&pool);
            let successful = Arc::clone(&tally.successful);
            let failed = Arc::clone(&tally.failed);
            let key_count = config.key_count.max(1);
            let value = vec![t as u8; config.value_size];

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = stress_key((t * ops_per_thread + i) % key_count);
                    let result = pool.acquire().and_then(|handle| {
                        handle.store(&key, &value, StoreMode::Replace)?;
                        handle.fetch(&key)?;
                        handle.close()
                    });
                    Tally::record(&successful, &failed, result);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start)
}

/// Run a mixed read/write stress test through one synchronized store.
pub fn stress_synchronized(
    store: Arc<SynchronizedStore<StoreHandle>>,
    config: &StressConfig,
) -> StressTestResult {
    let tally = Tally::new();
    let ops_per_thread = config.ops_per_thread();
    let start = Instant::now();

    let handles: Vec<_> = (0..config.worker_threads())
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&tally.successful);
            let failed = Arc::clone(&tally.failed);
            let key_count = config.key_count.max(1);
            let value = vec![0xABu8; config.value_size];

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = stress_key((t * ops_per_thread + i) % key_count);
                    let result = if i % 2 == 0 {
                        store.store(&key, &value, StoreMode::Replace).map(|_| ())
                    } else {
                        // A missing key is still a successful read.
                        match store.fetch(&key) {
                            Err(err) if err.is_no_entry() => Ok(()),
                            other => other.map(|_| ()),
                        }
                    };
                    Tally::record(&successful, &failed, result);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start)
}

/// Run a lock contention stress test.
///
/// Every thread gets its own duplicate of `store` and increments one
/// shared counter under the whole-store lock. Returns the result and the
/// final counter value, which equals the successful operation count only
/// if the lock excluded every other writer.
pub fn stress_lock_contention(store: &StoreHandle, config: &StressConfig) -> (StressTestResult, u64) {
    const COUNTER: &[u8] = b"stress-counter";

    store
        .store(COUNTER, &0u64.to_le_bytes(), StoreMode::Replace)
        .expect("Failed to seed counter");

    let tally = Tally::new();
    let ops_per_thread = config.ops_per_thread();
    let start = Instant::now();

    let handles: Vec<_> = (0..config.worker_threads())
        .map(|_| {
            let handle = store.duplicate().expect("Failed to duplicate handle");
            let successful = Arc::clone(&tally.successful);
            let failed = Arc::clone(&tally.failed);

            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let result = handle.lock_guard().and_then(|guard| {
                        let raw = handle.fetch(COUNTER)?;
                        let mut bytes = [0u8; 8];
                        bytes.copy_from_slice(&raw);
                        let next = u64::from_le_bytes(bytes) + 1;
                        handle.store(COUNTER, &next.to_le_bytes(), StoreMode::Replace)?;
                        guard.unlock()
                    });
                    Tally::record(&successful, &failed, result);
                }
                handle.close().expect("Failed to close duplicate");
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let raw = store.fetch(COUNTER).expect("Failed to read counter");
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw);
    (tally.finish(start), u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{test_runtime, unique_path};
    use mapstore_core::OpenOptions;

    #[test]
    fn test_pool_checkouts() {
        let runtime = test_runtime();
        let pool = Arc::new(
            runtime
                .open_pool(unique_path("stress-pool"), &OpenOptions::new(), 2)
                .unwrap(),
        );
        let config = StressConfig {
            operations: 1_000,
            threads: 4,
            value_size: 32,
            key_count: 50,
        };

        let result = stress_pool_checkouts(Arc::clone(&pool), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 1_000);
        assert_eq!(pool.in_flight(), 0);
        pool.close().unwrap();
        assert_eq!(runtime.stats().pool_checkouts(), 1_000);
        assert_eq!(runtime.stats().pool_returns(), 1_000);
    }

    #[test]
    fn test_zero_threads_runs_one_worker() {
        let config = StressConfig {
            operations: 100,
            threads: 0,
            key_count: 0,
            ..Default::default()
        };
        assert_eq!(config.worker_threads(), 1);
        assert_eq!(config.ops_per_thread(), 100);

        let runtime = test_runtime();
        let store = Arc::new(
            runtime
                .open_synchronized(unique_path("stress-zero"), &OpenOptions::new())
                .unwrap(),
        );
        let result = stress_synchronized(Arc::clone(&store), &config);
        assert_eq!(result.successful_ops + result.failed_ops, 100);
        assert_eq!(result.failed_ops, 0);
        store.close().unwrap();
    }

    #[test]
    fn test_synchronized() {
        let runtime = test_runtime();
        let store = Arc::new(
            runtime
                .open_synchronized(unique_path("stress-sync"), &OpenOptions::new())
                .unwrap(),
        );
        let config = StressConfig {
            operations: 1_000,
            value_size: 64,
            key_count: 100,
            ..Default::default()
        };

        let result = stress_synchronized(Arc::clone(&store), &config);
        assert_eq!(result.failed_ops, 0);
        store.close().unwrap();
    }

    #[test]
    fn test_lock_contention() {
        let runtime = test_runtime();
        let store = runtime
            .open(unique_path("stress-lock"), &OpenOptions::new())
            .unwrap();
        let config = StressConfig {
            operations: 400,
            threads: 4,
            ..Default::default()
        };

        let (result, counter) = stress_lock_contention(&store, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(counter, 400);
        store.close().unwrap();
    }
}
