//! The owning store handle.

use crate::config::OpenOptions;
use crate::error::{CoreError, CoreResult};
use crate::finalizer::FinalizingHandle;
use crate::stats::HandleStats;
use crate::store::{Binding, MapStore, Session};
use mapstore_engine::{ResourceToken, StoreEngine};
use std::cell::Cell;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// An open store that owns its engine token.
///
/// The token is released by [`close`](MapStore::close) or, if the owner
/// forgets, when the handle is dropped (logged and counted as a leak).
/// Every operation validates the handle first and fails with
/// `InvalidState` once it is closed; closing twice is also
/// `InvalidState`.
///
/// A handle is `Send` but not `Sync`: the engine token is not reentrant.
/// Share one handle across threads with [`crate::SynchronizedStore`], or
/// give each thread its own through [`crate::HandlePool`].
#[derive(Debug)]
pub struct StoreHandle {
    binding: Binding,
    owner: FinalizingHandle,
    _not_sync: PhantomData<Cell<()>>,
}

impl StoreHandle {
    pub(crate) fn open(
        engine: Arc<dyn StoreEngine>,
        stats: Arc<HandleStats>,
        path: &Path,
        options: &OpenOptions,
    ) -> CoreResult<Self> {
        options.validate(path)?;
        let token = engine
            .open(
                path,
                options.flags,
                options.mode,
                options.page_size,
                options.presize,
            )
            .map_err(|source| CoreError::Open {
                path: path.to_path_buf(),
                info: options.info(),
                source,
            })?;
        stats.record_open();
        debug!(%token, path = %path.display(), flags = ?options.flags, "opened store");

        let binding = Binding::new(engine, stats, path.to_path_buf(), options.flags);
        Ok(Self::from_token(binding, token))
    }

    fn from_token(binding: Binding, token: ResourceToken) -> Self {
        let owner = FinalizingHandle::new(
            token,
            binding.release_fn(),
            binding.path().display().to_string(),
            Arc::clone(binding.stats()),
        );
        Self {
            binding,
            owner,
            _not_sync: PhantomData,
        }
    }

    /// Opens another handle on the same store, with its own token and
    /// lock ownership.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if this handle is closed, or `Engine` if the
    /// engine cannot duplicate it.
    pub fn duplicate(&self) -> CoreResult<StoreHandle> {
        let token = self.with_session(|s| s.duplicate())?;
        debug!(%token, path = %self.path().display(), "duplicated store handle");
        Ok(Self::from_token(self.binding.clone(), token))
    }

    /// Returns true if the store was opened with shared locks.
    #[must_use]
    pub fn shared_locks(&self) -> bool {
        self.binding.shared()
    }

    pub(crate) fn into_parts(self) -> (Binding, FinalizingHandle) {
        (self.binding, self.owner)
    }
}

impl MapStore for StoreHandle {
    fn with_session<R>(&self, f: impl FnOnce(&Session<'_>) -> CoreResult<R>) -> CoreResult<R> {
        let token = self.owner.token()?;
        f(&Session::new(&self.binding, token))
    }

    fn path(&self) -> &Path {
        self.binding.path()
    }

    fn is_closed(&self) -> CoreResult<bool> {
        self.owner.is_closed()
    }

    fn close(&self) -> CoreResult<()> {
        self.owner.close()
    }

    fn close_fd(&self) -> CoreResult<()> {
        self.with_session(|s| s.close_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use mapstore_engine::{InMemoryEngine, OpenFlags, StoreMode};

    fn runtime() -> Runtime {
        Runtime::new(InMemoryEngine::new()).unwrap()
    }

    #[test]
    fn store_fetch_round_trip() {
        let runtime = runtime();
        let store = runtime.open("/handle", &OpenOptions::new()).unwrap();

        assert!(store.store(b"key", b"value", StoreMode::Replace).unwrap());
        assert_eq!(store.fetch(b"key").unwrap(), b"value");
        store.close().unwrap();
    }

    #[test]
    fn insert_twice_reports_exists() {
        let runtime = runtime();
        let store = runtime.open("/insert", &OpenOptions::new()).unwrap();

        assert!(store.store(b"k", b"1", StoreMode::Insert).unwrap());
        assert!(!store.store(b"k", b"2", StoreMode::Insert).unwrap());
        assert_eq!(store.fetch(b"k").unwrap(), b"1");
        store.close().unwrap();
    }

    #[test]
    fn modify_missing_is_store_error() {
        let runtime = runtime();
        let store = runtime.open("/modify", &OpenOptions::new()).unwrap();
        let err = store.store(b"absent", b"v", StoreMode::Modify).unwrap_err();
        assert!(matches!(err, CoreError::Store { .. }));
        store.close().unwrap();
    }

    #[test]
    fn closed_handle_rejects_everything() {
        let runtime = runtime();
        let store = runtime.open("/closed", &OpenOptions::new()).unwrap();
        store.close().unwrap();

        assert!(store.fetch(b"k").unwrap_err().is_invalid_state());
        assert!(store.lock().unwrap_err().is_invalid_state());
        assert!(store.validate().unwrap_err().is_invalid_state());
        assert!(store.is_closed().unwrap_err().is_invalid_state());
        assert!(store.close().unwrap_err().is_invalid_state());
    }

    #[test]
    fn shared_lock_requires_shared_mode() {
        let runtime = runtime();
        let store = runtime.open("/plain", &OpenOptions::new()).unwrap();
        for result in [
            store.shared_lock(),
            store.try_shared_lock(),
            store.probe_shared_lock().map(|_| ()),
            store.shared_unlock(),
        ] {
            assert!(matches!(
                result,
                Err(CoreError::SharedLockViolation { .. })
            ));
        }
        store.close().unwrap();
    }

    #[test]
    fn duplicate_has_own_lock_ownership() {
        let runtime = runtime();
        let store = runtime.open("/dup", &OpenOptions::new()).unwrap();
        let dup = store.duplicate().unwrap();

        store.lock().unwrap();
        assert!(store.is_owned().unwrap());
        assert!(!dup.is_owned().unwrap());
        assert!(!dup.probe_lock().unwrap().is_acquired());
        assert!(dup.try_lock().is_err());
        store.unlock().unwrap();
        assert_eq!(dup.probe_lock().unwrap().as_raw(), 1);
        dup.unlock().unwrap();

        dup.close().unwrap();
        store.close().unwrap();
        assert_eq!(runtime.stats().duplicates(), 1);
        assert_eq!(runtime.stats().lock_failures(), 1);
    }

    #[test]
    fn close_fd_then_fsync_fails() {
        let runtime = runtime();
        let store = runtime.open("/fd", &OpenOptions::new()).unwrap();
        store.fsync().unwrap();
        store.close_fd().unwrap();
        assert!(matches!(
            store.fsync(),
            Err(CoreError::Engine {
                operation: "fsync",
                ..
            })
        ));
        store.close().unwrap();
    }

    #[test]
    fn open_failure_carries_context() {
        let runtime = runtime();
        let options = OpenOptions::new().flags(OpenFlags::RDWR);
        let err = runtime.open("/nowhere", &options).unwrap_err();
        match err {
            CoreError::Open { path, info, .. } => {
                assert_eq!(path, Path::new("/nowhere"));
                assert!(info.starts_with("flags: 0x2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn geometry_and_hash() {
        let runtime = runtime();
        let store = runtime
            .open("/geo", &OpenOptions::new().page_size(8192))
            .unwrap();
        assert_eq!(store.page_size().unwrap(), 8192);
        assert_eq!(store.limit_size().unwrap(), 0);
        assert_eq!(store.alignment().unwrap(), 0);
        assert_eq!(store.hash_code().unwrap(), 5);

        store.pre_split(4).unwrap();
        assert_eq!(store.size().unwrap(), 4 * 8192);
        store.close().unwrap();
    }

    proptest::proptest! {
        #[test]
        fn replaced_entries_iterate_once(
            entries in proptest::collection::hash_map(
                proptest::collection::vec(proptest::prelude::any::<u8>(), 1..24),
                proptest::collection::vec(proptest::prelude::any::<u8>(), 0..48),
                0..64,
            )
        ) {
            let runtime = runtime();
            let store = runtime.open("/prop", &OpenOptions::new()).unwrap();
            for (key, value) in &entries {
                proptest::prop_assert!(store.store(key, value, StoreMode::Replace).unwrap());
            }

            let mut seen = std::collections::HashMap::new();
            for entry in store.entries().unwrap() {
                let (key, value) = entry.unwrap();
                proptest::prop_assert!(seen.insert(key, value).is_none());
            }
            proptest::prop_assert_eq!(&seen, &entries);
            store.close().unwrap();
        }
    }
}
