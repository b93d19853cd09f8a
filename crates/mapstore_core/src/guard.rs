//! Scoped lock guards.
//!
//! Each guard releases one level of the lock it was created for when it
//! goes out of scope. [`StoreLock::unlock`] and friends release early and
//! report the result; a guard releases at most once either way. A failed
//! release on drop is logged, since drop cannot return it.

use crate::error::CoreResult;
use crate::store::MapStore;
use mapstore_engine::OpenFlags;
use tracing::warn;

#[derive(Debug)]
enum Scope {
    Store,
    Page { key: Vec<u8>, flags: OpenFlags },
    Smart { key: Vec<u8>, flags: OpenFlags },
    Shared,
}

#[derive(Debug)]
struct Held<'a, S: MapStore> {
    store: &'a S,
    scope: Scope,
    active: bool,
}

impl<'a, S: MapStore> Held<'a, S> {
    fn new(store: &'a S, scope: Scope) -> Self {
        Self {
            store,
            scope,
            active: true,
        }
    }

    fn release(&mut self) -> CoreResult<()> {
        if !std::mem::replace(&mut self.active, false) {
            return Ok(());
        }
        match &self.scope {
            Scope::Store => self.store.unlock(),
            Scope::Page { key, flags } => self.store.punlock(key, *flags),
            Scope::Smart { key, flags } => self.store.unlock_smart(key, *flags),
            Scope::Shared => self.store.shared_unlock(),
        }
    }
}

impl<S: MapStore> Drop for Held<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(path = %self.store.path().display(), scope = ?self.scope, error = %err, "lock release on drop failed");
        }
    }
}

/// Holds the whole-store lock; from [`MapStore::lock_guard`].
#[derive(Debug)]
pub struct StoreLock<'a, S: MapStore>(Held<'a, S>);

impl<'a, S: MapStore> StoreLock<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self(Held::new(store, Scope::Store))
    }

    /// Releases the lock now.
    ///
    /// # Errors
    ///
    /// Returns `UnlockFailed` if the release fails.
    pub fn unlock(mut self) -> CoreResult<()> {
        self.0.release()
    }
}

/// Holds a page lock; from [`MapStore::plock_guard`].
#[derive(Debug)]
pub struct PageLock<'a, S: MapStore>(Held<'a, S>);

impl<'a, S: MapStore> PageLock<'a, S> {
    pub(crate) fn new(store: &'a S, key: &[u8], flags: OpenFlags) -> Self {
        Self(Held::new(
            store,
            Scope::Page {
                key: key.to_vec(),
                flags,
            },
        ))
    }

    /// Releases the lock now.
    ///
    /// # Errors
    ///
    /// Returns `UnlockFailed` if the release fails.
    pub fn unlock(mut self) -> CoreResult<()> {
        self.0.release()
    }
}

/// Holds a smart lock; from [`MapStore::smart_lock_guard`].
#[derive(Debug)]
pub struct SmartLock<'a, S: MapStore>(Held<'a, S>);

impl<'a, S: MapStore> SmartLock<'a, S> {
    pub(crate) fn new(store: &'a S, key: &[u8], flags: OpenFlags) -> Self {
        Self(Held::new(
            store,
            Scope::Smart {
                key: key.to_vec(),
                flags,
            },
        ))
    }

    /// Releases the lock now.
    ///
    /// # Errors
    ///
    /// Returns `UnlockFailed` if the release fails.
    pub fn unlock(mut self) -> CoreResult<()> {
        self.0.release()
    }
}

/// Holds a shared lock; from [`MapStore::shared_lock_guard`].
#[derive(Debug)]
pub struct SharedLock<'a, S: MapStore>(Held<'a, S>);

impl<'a, S: MapStore> SharedLock<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self(Held::new(store, Scope::Shared))
    }

    /// Releases the lock now.
    ///
    /// # Errors
    ///
    /// Returns `UnlockFailed` if the release fails.
    pub fn unlock(mut self) -> CoreResult<()> {
        self.0.release()
    }
}

#[cfg(test)]
mod tests {
    use crate::{MapStore, OpenOptions, Runtime};
    use mapstore_engine::{InMemoryEngine, OpenFlags};

    #[test]
    fn guard_releases_on_drop() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let store = runtime.open("/guard", &OpenOptions::new()).unwrap();
        let other = store.duplicate().unwrap();

        {
            let _guard = store.lock_guard().unwrap();
            assert!(!other.probe_lock().unwrap().is_acquired());
        }
        assert!(other.probe_lock().unwrap().is_acquired());
        other.unlock().unwrap();

        other.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn explicit_unlock_releases_once() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let store = runtime.open("/guard-once", &OpenOptions::new()).unwrap();

        store.lock().unwrap();
        let guard = store.lock_guard().unwrap();
        guard.unlock().unwrap();
        // The outer level is still held.
        assert!(store.is_owned().unwrap());
        store.unlock().unwrap();
        assert!(!store.is_owned().unwrap());
        store.close().unwrap();
    }

    #[test]
    fn page_and_shared_guards() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let partitioned = runtime
            .open("/guard-pages", &OpenOptions::new().partitioned_locks())
            .unwrap();
        {
            let _page = partitioned.plock_guard(b"key", OpenFlags::RDWR).unwrap();
            assert!(partitioned.is_owned().unwrap());
        }
        assert!(!partitioned.is_locked().unwrap());
        partitioned.close().unwrap();

        let shared = runtime
            .open("/guard-shared", &OpenOptions::new().shared_locks())
            .unwrap();
        {
            let _read = shared.shared_lock_guard().unwrap();
            let _smart = shared.smart_lock_guard(b"key", OpenFlags::RDONLY).unwrap();
            assert!(shared.is_owned().unwrap());
        }
        assert!(!shared.is_locked().unwrap());
        shared.close().unwrap();
    }
}
