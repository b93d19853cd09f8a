//! Engine bring-up and the entry points that open handles.

use crate::config::OpenOptions;
use crate::error::{CoreError, CoreResult};
use crate::pool::HandlePool;
use crate::stats::HandleStats;
use crate::store::StoreHandle;
use crate::sync::SynchronizedStore;
use mapstore_engine::{HashFunction, InMemoryEngine, StoreEngine};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static GLOBAL: OnceLock<CoreResult<Runtime>> = OnceLock::new();

/// An initialized engine plus the statistics shared by every handle it
/// opens.
///
/// Creating a runtime calls [`StoreEngine::initialize`] once. Nothing is
/// initialized implicitly: code that needs a process-wide runtime asks for
/// [`Runtime::global`].
#[derive(Clone)]
pub struct Runtime {
    engine: Arc<dyn StoreEngine>,
    stats: Arc<HandleStats>,
}

impl Runtime {
    /// Initializes `engine` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns `Engine` if initialization fails.
    pub fn new<E: StoreEngine + 'static>(engine: E) -> CoreResult<Self> {
        Self::from_shared(Arc::new(engine))
    }

    /// Initializes an engine that is already shared.
    ///
    /// # Errors
    ///
    /// Returns `Engine` if initialization fails.
    pub fn from_shared(engine: Arc<dyn StoreEngine>) -> CoreResult<Self> {
        engine.initialize().map_err(|source| CoreError::Engine {
            path: PathBuf::new(),
            operation: "initialize",
            source,
        })?;
        debug!("initialized store engine");
        Ok(Self {
            engine,
            stats: Arc::new(HandleStats::new()),
        })
    }

    /// Returns the process-wide runtime over an [`InMemoryEngine`],
    /// initializing it on first use.
    ///
    /// # Errors
    ///
    /// Returns the initialization error, on this and every later call.
    pub fn global() -> CoreResult<&'static Runtime> {
        GLOBAL
            .get_or_init(|| Runtime::new(InMemoryEngine::new()))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn StoreEngine> {
        &self.engine
    }

    /// Returns the statistics shared by every handle of this runtime.
    #[must_use]
    pub fn stats(&self) -> &HandleStats {
        &self.stats
    }

    /// Opens a store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` for an empty path, or `Open` carrying
    /// the path and options if the engine refuses.
    pub fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> CoreResult<StoreHandle> {
        StoreHandle::open(
            Arc::clone(&self.engine),
            Arc::clone(&self.stats),
            path.as_ref(),
            options,
        )
    }

    /// Opens a store and builds a pool of `capacity` handles on it.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open) and [`HandlePool::new`].
    pub fn open_pool(
        &self,
        path: impl AsRef<Path>,
        options: &OpenOptions,
        capacity: usize,
    ) -> CoreResult<HandlePool> {
        if capacity == 0 {
            return Err(CoreError::create_pool("pool capacity must be positive"));
        }
        HandlePool::new(self.open(path, options)?, capacity)
    }

    /// Opens a store wrapped for use from many threads.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open).
    pub fn open_synchronized(
        &self,
        path: impl AsRef<Path>,
        options: &OpenOptions,
    ) -> CoreResult<SynchronizedStore<StoreHandle>> {
        Ok(SynchronizedStore::new(self.open(path, options)?))
    }

    /// Hashes `key` with the function numbered `code`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHashFunction` for an unknown code, or `Engine` if
    /// the engine cannot compute it.
    pub fn hash_value(&self, key: &[u8], code: i32) -> CoreResult<u32> {
        let hash = HashFunction::from_code(code).ok_or(CoreError::UnknownHashFunction { code })?;
        self.engine
            .hash_value(key, hash)
            .map_err(|source| CoreError::Engine {
                path: PathBuf::new(),
                operation: "hash_value",
                source,
            })
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapStore;
    use mapstore_engine::{EngineError, OpenFlags};

    #[test]
    fn global_is_shared() {
        let a = Runtime::global().unwrap();
        let b = Runtime::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn open_missing_without_create() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let err = runtime
            .open("/missing", &OpenOptions::new().flags(OpenFlags::RDWR))
            .unwrap_err();
        match err {
            CoreError::Open { path, info, source } => {
                assert_eq!(path, Path::new("/missing"));
                assert!(info.starts_with("flags: 0x2 mode: 0644"));
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_path_is_invalid_parameters() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        assert!(matches!(
            runtime.open("", &OpenOptions::new()),
            Err(CoreError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn hash_value_by_code() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        assert_eq!(runtime.hash_value(b"", 5).unwrap(), 33_554_467);
        assert_eq!(
            runtime.hash_value(b"k", 42),
            Err(CoreError::UnknownHashFunction { code: 42 })
        );
        assert!(matches!(
            runtime.hash_value(b"k", 7),
            Err(CoreError::Engine {
                source: EngineError::Unsupported(_),
                ..
            })
        ));
    }

    #[test]
    fn synchronized_open() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let store = runtime
            .open_synchronized("/sync-open", &OpenOptions::new())
            .unwrap();
        assert_eq!(store.path(), Path::new("/sync-open"));
        store.close().unwrap();
        assert_eq!(runtime.stats().closes(), 1);
    }
}
