//! Handle statistics.
//!
//! Counters for opens, closes, finalizer activity, pool traffic and lock
//! contention. Reclaims by the finalizer mean a handle was leaked; a
//! non-zero [`HandleStats::finalizer_reclaims`] is a caller bug.
//!
//! # Usage
//!
//! ```rust
//! use mapstore_core::{OpenOptions, Runtime};
//! use mapstore_engine::InMemoryEngine;
//!
//! let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
//! let store = runtime.open("/stats-doc", &OpenOptions::new()).unwrap();
//! drop(store);
//!
//! let stats = runtime.stats().snapshot();
//! assert_eq!(stats.opens, 1);
//! assert_eq!(stats.finalizer_reclaims, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Handle statistics and metrics.
///
/// All counters are atomic and can be read while operations are in
/// progress. Values only increase.
#[derive(Debug, Default)]
pub struct HandleStats {
    // Handle counters
    opens: AtomicU64,
    closes: AtomicU64,
    duplicates: AtomicU64,

    // Finalizer counters
    finalizer_reclaims: AtomicU64,
    finalizer_failures: AtomicU64,

    // Pool counters
    pool_checkouts: AtomicU64,
    pool_returns: AtomicU64,
    pool_waits: AtomicU64,
    refused_teardowns: AtomicU64,

    // Lock counters
    lock_failures: AtomicU64,
}

impl HandleStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finalizer_reclaim(&self) {
        self.finalizer_reclaims.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finalizer_failure(&self) {
        self.finalizer_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_checkout(&self) {
        self.pool_checkouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_return(&self) {
        self.pool_returns.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an acquire that had to wait for a free slot.
    pub(crate) fn record_pool_wait(&self) {
        self.pool_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refused_teardown(&self) {
        self.refused_teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_failure(&self) {
        self.lock_failures.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of stores opened.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Returns the number of explicit closes.
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    /// Returns the number of duplicated handles.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Returns the number of leaked handles released on drop.
    pub fn finalizer_reclaims(&self) -> u64 {
        self.finalizer_reclaims.load(Ordering::Relaxed)
    }

    /// Returns the number of failed releases on drop.
    pub fn finalizer_failures(&self) -> u64 {
        self.finalizer_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of pool checkouts.
    pub fn pool_checkouts(&self) -> u64 {
        self.pool_checkouts.load(Ordering::Relaxed)
    }

    /// Returns the number of handles returned to a pool.
    pub fn pool_returns(&self) -> u64 {
        self.pool_returns.load(Ordering::Relaxed)
    }

    /// Returns the number of acquires that waited for a slot.
    pub fn pool_waits(&self) -> u64 {
        self.pool_waits.load(Ordering::Relaxed)
    }

    /// Returns the number of refused pool teardowns.
    pub fn refused_teardowns(&self) -> u64 {
        self.refused_teardowns.load(Ordering::Relaxed)
    }

    /// Returns the number of failed non-blocking lock attempts.
    pub fn lock_failures(&self) -> u64 {
        self.lock_failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            opens: self.opens(),
            closes: self.closes(),
            duplicates: self.duplicates(),
            finalizer_reclaims: self.finalizer_reclaims(),
            finalizer_failures: self.finalizer_failures(),
            pool_checkouts: self.pool_checkouts(),
            pool_returns: self.pool_returns(),
            pool_waits: self.pool_waits(),
            refused_teardowns: self.refused_teardowns(),
            lock_failures: self.lock_failures(),
        }
    }
}

/// A point-in-time snapshot of handle statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Stores opened.
    pub opens: u64,
    /// Explicit closes.
    pub closes: u64,
    /// Duplicated handles.
    pub duplicates: u64,
    /// Leaked handles released on drop.
    pub finalizer_reclaims: u64,
    /// Failed releases on drop.
    pub finalizer_failures: u64,
    /// Pool checkouts.
    pub pool_checkouts: u64,
    /// Pool returns.
    pub pool_returns: u64,
    /// Acquires that waited for a slot.
    pub pool_waits: u64,
    /// Refused pool teardowns.
    pub refused_teardowns: u64,
    /// Failed non-blocking lock attempts.
    pub lock_failures: u64,
}

impl StatsSnapshot {
    /// Handles checked out and not yet returned, across all pools.
    pub fn pool_outstanding(&self) -> u64 {
        self.pool_checkouts.saturating_sub(self.pool_returns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn stats_new_is_zeroed() {
        let stats = HandleStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn stats_record_counters() {
        let stats = HandleStats::new();
        stats.record_open();
        stats.record_open();
        stats.record_close();
        stats.record_finalizer_reclaim();
        stats.record_pool_checkout();
        stats.record_pool_checkout();
        stats.record_pool_return();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.opens, 2);
        assert_eq!(snapshot.closes, 1);
        assert_eq!(snapshot.finalizer_reclaims, 1);
        assert_eq!(snapshot.pool_outstanding(), 1);
    }

    #[test]
    fn stats_concurrent_updates() {
        let stats = Arc::new(HandleStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats.record_pool_checkout();
                    stats.record_pool_return();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.pool_checkouts(), 1000);
        assert_eq!(stats.pool_returns(), 1000);
    }
}
