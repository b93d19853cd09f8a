//! Test fixtures and store helpers.
//!
//! Provides runtimes over fresh engines, stores that close themselves, and
//! [`CountingEngine`], which records every token release so tests can
//! check that nothing is released twice or leaked.

use mapstore_core::{MapStore, OpenOptions, Runtime, StoreHandle};
use mapstore_engine::{
    EngineError, EngineResult, Geometry, HashFunction, InMemoryEngine, IterState, LockKind,
    LockWait, OpenFlags, PruneDecision, ResourceToken, ShakeFn, StoreEngine, StoreFlags,
    StoreOutcome,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_PATH: AtomicUsize = AtomicUsize::new(0);

/// Returns a store path no other call in this process has returned.
pub fn unique_path(prefix: &str) -> PathBuf {
    let n = NEXT_PATH.fetch_add(1, Ordering::Relaxed);
    PathBuf::from(format!("/{prefix}-{n}"))
}

/// Creates a runtime over a fresh in-memory engine.
pub fn test_runtime() -> Runtime {
    Runtime::new(InMemoryEngine::new()).expect("Failed to initialize engine")
}

/// A test store that closes itself when dropped.
pub struct TestStore {
    /// The runtime the store was opened on.
    pub runtime: Runtime,
    /// The open handle.
    pub store: StoreHandle,
}

impl TestStore {
    /// Opens a store with default options on a fresh runtime.
    pub fn new() -> Self {
        Self::with_options(&OpenOptions::new())
    }

    /// Opens a store with `options` on a fresh runtime.
    pub fn with_options(options: &OpenOptions) -> Self {
        let runtime = test_runtime();
        let store = runtime
            .open(unique_path("test"), options)
            .expect("Failed to open store");
        Self { runtime, store }
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = StoreHandle;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        if !self.store.is_closed().unwrap_or(true) {
            let _ = self.store.close();
        }
    }
}

/// Runs a test with a temporary store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&StoreHandle) -> R,
{
    let test_store = TestStore::new();
    f(&test_store.store)
}

/// Runs a test with a temporary store opened with `options`.
pub fn with_store_options<F, R>(options: &OpenOptions, f: F) -> R
where
    F: FnOnce(&StoreHandle) -> R,
{
    let test_store = TestStore::with_options(options);
    f(&test_store.store)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use mapstore_core::StoreMode;

    /// Key of the `i`th entry written by [`populate`].
    pub fn key(i: usize) -> Vec<u8> {
        format!("key-{i:06}").into_bytes()
    }

    /// Value of the `i`th entry written by [`populate`].
    pub fn value(i: usize) -> Vec<u8> {
        format!("value-{i}").into_bytes()
    }

    /// Writes `count` entries with [`key`] and [`value`].
    pub fn populate<S: MapStore>(store: &S, count: usize) {
        for i in 0..count {
            store
                .store(&key(i), &value(i), StoreMode::Replace)
                .expect("Failed to populate store");
        }
    }

    /// Creates a store with `count` pre-populated entries.
    pub fn populated_store(count: usize) -> TestStore {
        let store = TestStore::new();
        populate(&store.store, count);
        store
    }
}

/// An engine decorator that records every token release.
///
/// Forwards every call to an [`InMemoryEngine`]. Tests use it to prove
/// that each token is released exactly once, and to inject duplicate and
/// close failures.
#[derive(Debug, Default)]
pub struct CountingEngine {
    inner: InMemoryEngine,
    closes: Mutex<HashMap<ResourceToken, usize>>,
    issued: Mutex<Vec<ResourceToken>>,
    duplicates_left: Mutex<Option<usize>>,
    fail_close: AtomicBool,
}

impl CountingEngine {
    /// Creates a counting engine over a fresh in-memory engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many times `close` was called for `token`.
    pub fn close_count(&self, token: ResourceToken) -> usize {
        self.closes.lock().get(&token).copied().unwrap_or(0)
    }

    /// Returns the total number of `close` calls.
    pub fn total_closes(&self) -> usize {
        self.closes.lock().values().sum()
    }

    /// Returns every token handed out by `open` or `duplicate`.
    pub fn issued(&self) -> Vec<ResourceToken> {
        self.issued.lock().clone()
    }

    /// Returns the tokens that were handed out but never passed to
    /// `close`.
    pub fn leaked(&self) -> Vec<ResourceToken> {
        let closes = self.closes.lock();
        self.issued
            .lock()
            .iter()
            .copied()
            .filter(|token| !closes.contains_key(token))
            .collect()
    }

    /// Returns true if no token was closed more than once.
    pub fn released_at_most_once(&self) -> bool {
        self.closes.lock().values().all(|&count| count <= 1)
    }

    /// Lets the next `n` duplicates succeed, then fails every later one.
    pub fn fail_duplicates_after(&self, n: usize) {
        *self.duplicates_left.lock() = Some(n);
    }

    /// Makes every close fail (without releasing or counting) while set.
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of tokens the inner engine still holds.
    pub fn live_tokens(&self) -> usize {
        self.inner.live_tokens()
    }
}

impl StoreEngine for CountingEngine {
    fn initialize(&self) -> EngineResult<()> {
        self.inner.initialize()
    }

    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
        page_size: u32,
        presize: u64,
    ) -> EngineResult<ResourceToken> {
        let token = self.inner.open(path, flags, mode, page_size, presize)?;
        self.issued.lock().push(token);
        Ok(token)
    }

    fn close(&self, token: ResourceToken) -> EngineResult<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(EngineError::unsupported("close disabled by test"));
        }
        *self.closes.lock().entry(token).or_insert(0) += 1;
        self.inner.close(token)
    }

    fn duplicate(&self, token: ResourceToken) -> EngineResult<ResourceToken> {
        {
            let mut left = self.duplicates_left.lock();
            if let Some(n) = left.as_mut() {
                if *n == 0 {
                    return Err(EngineError::unsupported("duplicate disabled by test"));
                }
                *n -= 1;
            }
        }
        let token = self.inner.duplicate(token)?;
        self.issued.lock().push(token);
        Ok(token)
    }

    fn close_fd(&self, token: ResourceToken) -> EngineResult<()> {
        self.inner.close_fd(token)
    }

    fn store(
        &self,
        token: ResourceToken,
        key: &[u8],
        value: &[u8],
        flags: StoreFlags,
        cursor: Option<&mut IterState>,
    ) -> EngineResult<StoreOutcome> {
        self.inner.store(token, key, value, flags, cursor)
    }

    fn fetch(
        &self,
        token: ResourceToken,
        key: &[u8],
        cursor: Option<&mut IterState>,
    ) -> EngineResult<Vec<u8>> {
        self.inner.fetch(token, key, cursor)
    }

    fn fetch_dup(
        &self,
        token: ResourceToken,
        key: &[u8],
        cursor: &mut IterState,
    ) -> EngineResult<Vec<u8>> {
        self.inner.fetch_dup(token, key, cursor)
    }

    fn delete(&self, token: ResourceToken, key: &[u8]) -> EngineResult<()> {
        self.inner.delete(token, key)
    }

    fn delete_at(&self, token: ResourceToken, cursor: &mut IterState) -> EngineResult<()> {
        self.inner.delete_at(token, cursor)
    }

    fn first(
        &self,
        token: ResourceToken,
        cursor: &mut IterState,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.inner.first(token, cursor)
    }

    fn next(
        &self,
        token: ResourceToken,
        cursor: &mut IterState,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.inner.next(token, cursor)
    }

    fn acquire_lock(
        &self,
        token: ResourceToken,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
        wait: LockWait,
    ) -> EngineResult<bool> {
        self.inner.acquire_lock(token, kind, key, flags, wait)
    }

    fn release_lock(
        &self,
        token: ResourceToken,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
    ) -> EngineResult<()> {
        self.inner.release_lock(token, kind, key, flags)
    }

    fn is_locked(&self, token: ResourceToken) -> EngineResult<bool> {
        self.inner.is_locked(token)
    }

    fn is_owned(&self, token: ResourceToken) -> EngineResult<bool> {
        self.inner.is_owned(token)
    }

    fn set_hash(&self, token: ResourceToken, hash: HashFunction) -> EngineResult<()> {
        self.inner.set_hash(token, hash)
    }

    fn hash(&self, token: ResourceToken) -> EngineResult<HashFunction> {
        self.inner.hash(token)
    }

    fn hash_value(&self, key: &[u8], hash: HashFunction) -> EngineResult<u32> {
        self.inner.hash_value(key, hash)
    }

    fn sync(&self, token: ResourceToken) -> EngineResult<()> {
        self.inner.sync(token)
    }

    fn fsync(&self, token: ResourceToken) -> EngineResult<()> {
        self.inner.fsync(token)
    }

    fn compress_tree(&self, token: ResourceToken) -> EngineResult<()> {
        self.inner.compress_tree(token)
    }

    fn truncate(&self, token: ResourceToken) -> EngineResult<()> {
        self.inner.truncate(token)
    }

    fn purge(&self, token: ResourceToken) -> EngineResult<()> {
        self.inner.purge(token)
    }

    fn pre_split(&self, token: ResourceToken, pages: u32) -> EngineResult<()> {
        self.inner.pre_split(token, pages)
    }

    fn set_spill_size(&self, token: ResourceToken, bytes: u32) -> EngineResult<()> {
        self.inner.set_spill_size(token, bytes)
    }

    fn limit_size(
        &self,
        token: ResourceToken,
        max_pages: u32,
        shake: Option<ShakeFn>,
    ) -> EngineResult<()> {
        self.inner.limit_size(token, max_pages, shake)
    }

    fn prune(
        &self,
        token: ResourceToken,
        prune: &mut dyn FnMut(&[u8], &[u8]) -> PruneDecision,
    ) -> EngineResult<usize> {
        self.inner.prune(token, prune)
    }

    fn replace_db(&self, token: ResourceToken, new_path: &Path) -> EngineResult<()> {
        self.inner.replace_db(token, new_path)
    }

    fn replace_file(&self, old_path: &Path, new_path: &Path) -> EngineResult<()> {
        self.inner.replace_file(old_path, new_path)
    }

    fn geometry(&self, token: ResourceToken) -> EngineResult<Geometry> {
        self.inner.geometry(token)
    }
}

/// A runtime over a shared [`CountingEngine`].
pub fn counting_runtime() -> (Runtime, Arc<CountingEngine>) {
    let engine = Arc::new(CountingEngine::new());
    let runtime = Runtime::from_shared(Arc::clone(&engine) as Arc<dyn StoreEngine>)
        .expect("Failed to initialize engine");
    (runtime, engine)
}
