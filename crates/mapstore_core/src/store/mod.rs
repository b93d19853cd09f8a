//! The store operation set.
//!
//! Every handle type implements [`MapStore`] by supplying
//! [`with_session`](MapStore::with_session): validate the handle, then run
//! a closure against a [`Session`] bound to a live token. All data, lock,
//! iteration and diagnostic operations are provided on top of that one
//! call, so a decorator that wraps `with_session` (for example in a mutex)
//! covers the whole operation set.

mod handle;
mod session;
mod view;

pub use handle::StoreHandle;
pub use session::Session;
pub(crate) use session::Binding;
pub(crate) use view::StoreView;

use crate::error::{CoreError, CoreResult};
use crate::guard::{PageLock, SharedLock, SmartLock, StoreLock};
use mapstore_engine::{
    HashFunction, IterState, LockKind, OpenFlags, PruneDecision, ShakeFn, StoreFlags,
};
use std::path::Path;

/// Outcome of a non-blocking lock probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockProbe {
    /// The lock was taken and must be released.
    Acquired,
    /// Another owner holds the lock.
    Busy,
}

impl LockProbe {
    /// Returns `1` for acquired and `-1` for busy.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Acquired => 1,
            Self::Busy => -1,
        }
    }

    /// Returns true if the lock was taken.
    #[must_use]
    pub const fn is_acquired(self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// Iteration position over a store.
///
/// A cursor is plain state; it is not tied to a handle and may be reused
/// with [`MapStore::first`] to restart.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    pub(crate) state: IterState,
}

impl Cursor {
    /// Creates an unpositioned cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the cursor has been positioned.
    #[must_use]
    pub fn is_positioned(&self) -> bool {
        self.state.positioned
    }
}

/// The operation set of an open store.
///
/// Implemented by [`StoreHandle`], [`crate::PooledHandle`],
/// [`crate::ExclusiveHandle`] and [`crate::SynchronizedStore`]. Every
/// provided operation validates the handle before any engine call and
/// fails with `InvalidState` on a closed handle.
pub trait MapStore {
    /// Validates the handle and runs `f` against a bound session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed, or whatever `f`
    /// returns.
    fn with_session<R>(&self, f: impl FnOnce(&Session<'_>) -> CoreResult<R>) -> CoreResult<R>;

    /// Returns the store path.
    fn path(&self) -> &Path;

    /// Returns whether the handle is closed.
    ///
    /// # Errors
    ///
    /// Handles that report invalid access return `InvalidState` instead
    /// of `true`.
    fn is_closed(&self) -> CoreResult<bool>;

    /// Closes the handle.
    ///
    /// # Errors
    ///
    /// Depends on the handle type; see each implementation.
    fn close(&self) -> CoreResult<()>;

    /// Closes the file descriptor behind the handle.
    ///
    /// # Errors
    ///
    /// Returns `UncloseableViolation` for handles that do not own their
    /// resource.
    fn close_fd(&self) -> CoreResult<()>;

    /// Checks that the handle can be used.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if it cannot.
    fn validate(&self) -> CoreResult<()> {
        self.with_session(|_| Ok(()))
    }

    // === Data ===

    /// Writes `value` under `key`.
    ///
    /// Returns `false` only when an insert finds the key present.
    ///
    /// # Errors
    ///
    /// Returns `Store` for every other failure, including a modify of a
    /// missing key.
    fn store(&self, key: &[u8], value: &[u8], flags: impl Into<StoreFlags>) -> CoreResult<bool> {
        let flags = flags.into();
        self.with_session(|s| s.store(key, value, flags, None))
    }

    /// Writes `value` under `key` and positions `cursor` on the entry.
    ///
    /// # Errors
    ///
    /// As for [`store`](Self::store).
    fn store_at(
        &self,
        key: &[u8],
        value: &[u8],
        flags: impl Into<StoreFlags>,
        cursor: &mut Cursor,
    ) -> CoreResult<bool> {
        let flags = flags.into();
        self.with_session(|s| s.store(key, value, flags, Some(&mut cursor.state)))
    }

    /// Writes a UTF-8 value under a UTF-8 key.
    ///
    /// # Errors
    ///
    /// As for [`store`](Self::store).
    fn store_str(&self, key: &str, value: &str, flags: impl Into<StoreFlags>) -> CoreResult<bool> {
        self.store(key.as_bytes(), value.as_bytes(), flags)
    }

    /// Reads the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NoEntry` if the key is absent, `Fetch` for other failures.
    fn fetch(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.with_session(|s| s.fetch(key, None))
    }

    /// Reads the value under `key` and positions `cursor` on the entry.
    ///
    /// # Errors
    ///
    /// As for [`fetch`](Self::fetch).
    fn fetch_at(&self, key: &[u8], cursor: &mut Cursor) -> CoreResult<Vec<u8>> {
        self.with_session(|s| s.fetch(key, Some(&mut cursor.state)))
    }

    /// Reads the UTF-8 value under a UTF-8 key.
    ///
    /// # Errors
    ///
    /// As for [`fetch`](Self::fetch); a value that is not UTF-8 is a
    /// `Fetch` error.
    fn fetch_str(&self, key: &str) -> CoreResult<String> {
        let path = self.path().to_path_buf();
        let value = self.fetch(key.as_bytes())?;
        String::from_utf8(value).map_err(|err| CoreError::Fetch {
            path,
            source: mapstore_engine::EngineError::invalid_argument(format!(
                "value is not UTF-8: {err}"
            )),
        })
    }

    /// Reads the next duplicate of `key` after `cursor`.
    ///
    /// Start with a fresh cursor; each call moves past the entry it
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns `NoEntry` once every duplicate has been visited.
    fn fetch_dup(&self, key: &[u8], cursor: &mut Cursor) -> CoreResult<Vec<u8>> {
        self.with_session(|s| s.fetch_dup(key, &mut cursor.state))
    }

    /// Deletes the entry under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NoEntry` if the key is absent, `Delete` for an invalid
    /// request such as an empty key.
    fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.with_session(|s| s.delete(key))
    }

    /// Deletes the entry under a UTF-8 key.
    ///
    /// # Errors
    ///
    /// As for [`delete`](Self::delete).
    fn delete_str(&self, key: &str) -> CoreResult<()> {
        self.delete(key.as_bytes())
    }

    /// Deletes the entry `cursor` is on.
    ///
    /// # Errors
    ///
    /// Returns `NoEntry` if that entry was already deleted, `Delete` if
    /// the cursor was never positioned.
    fn delete_at(&self, cursor: &mut Cursor) -> CoreResult<()> {
        self.with_session(|s| s.delete_at(&mut cursor.state))
    }

    // === Iteration ===

    /// Creates a new cursor for this store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn cursor(&self) -> CoreResult<Cursor> {
        self.with_session(|_| Ok(Cursor::new()))
    }

    /// Positions `cursor` on the first entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn first(&self, cursor: &mut Cursor) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.with_session(|s| s.first(&mut cursor.state))
    }

    /// Advances `cursor`; `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn next(&self, cursor: &mut Cursor) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.with_session(|s| s.next(&mut cursor.state))
    }

    /// Like [`first`](Self::first), returning only the key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn first_key(&self, cursor: &mut Cursor) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.first(cursor)?.map(|(key, _)| key))
    }

    /// Like [`next`](Self::next), returning only the key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn next_key(&self, cursor: &mut Cursor) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.next(cursor)?.map(|(key, _)| key))
    }

    /// Iterates over every entry from the start.
    ///
    /// Concurrent writers may cause entries to be skipped or repeated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn entries(&self) -> CoreResult<Entries<'_, Self>>
    where
        Self: Sized,
    {
        Ok(Entries {
            store: self,
            cursor: self.cursor()?,
            done: false,
        })
    }

    // === Whole-store lock ===

    /// Takes the whole-store lock, waiting if needed. Nests per owner.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` if the engine rejects the request.
    fn lock(&self) -> CoreResult<()> {
        self.with_session(|s| s.lock_blocking(LockKind::Exclusive, None, OpenFlags::RDONLY))
    }

    /// Takes the whole-store lock or fails.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` if another owner holds it.
    fn try_lock(&self) -> CoreResult<()> {
        self.with_session(|s| s.lock_or_fail(LockKind::Exclusive, None, OpenFlags::RDONLY))
    }

    /// Tries the whole-store lock without failing when busy.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` only if the engine rejects the request.
    fn probe_lock(&self) -> CoreResult<LockProbe> {
        self.with_session(|s| s.lock_probe(LockKind::Exclusive, None, OpenFlags::RDONLY))
    }

    /// Releases one level of the whole-store lock.
    ///
    /// # Errors
    ///
    /// Returns `UnlockFailed` if this handle does not hold it.
    fn unlock(&self) -> CoreResult<()> {
        self.with_session(|s| s.unlock(LockKind::Exclusive, None, OpenFlags::RDONLY))
    }

    /// Takes the whole-store lock and returns a guard that releases it.
    ///
    /// # Errors
    ///
    /// As for [`lock`](Self::lock).
    fn lock_guard(&self) -> CoreResult<StoreLock<'_, Self>>
    where
        Self: Sized,
    {
        self.lock()?;
        Ok(StoreLock::new(self))
    }

    // === Page lock ===

    /// Locks the page `key` hashes to, waiting if needed.
    ///
    /// Without partitioned locking this is the whole-store lock.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` if the engine rejects the request.
    fn plock(&self, key: &[u8], flags: OpenFlags) -> CoreResult<()> {
        self.with_session(|s| s.lock_blocking(LockKind::Partition, Some(key), flags))
    }

    /// Locks the page for `key` or fails.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` if another owner holds it.
    fn try_plock(&self, key: &[u8], flags: OpenFlags) -> CoreResult<()> {
        self.with_session(|s| s.lock_or_fail(LockKind::Partition, Some(key), flags))
    }

    /// Tries the page lock for `key` without failing when busy.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` only if the engine rejects the request.
    fn probe_plock(&self, key: &[u8], flags: OpenFlags) -> CoreResult<LockProbe> {
        self.with_session(|s| s.lock_probe(LockKind::Partition, Some(key), flags))
    }

    /// Releases one level of the page lock for `key`.
    ///
    /// # Errors
    ///
    /// Returns `UnlockFailed` if this handle does not hold it.
    fn punlock(&self, key: &[u8], flags: OpenFlags) -> CoreResult<()> {
        self.with_session(|s| s.unlock(LockKind::Partition, Some(key), flags))
    }

    /// Locks the page for `key` and returns a guard that releases it.
    ///
    /// # Errors
    ///
    /// As for [`plock`](Self::plock).
    fn plock_guard(&self, key: &[u8], flags: OpenFlags) -> CoreResult<PageLock<'_, Self>>
    where
        Self: Sized,
    {
        self.plock(key, flags)?;
        Ok(PageLock::new(self, key, flags))
    }

    // === Smart lock ===

    /// Takes whichever lock the store's lock mode selects for `key`:
    /// the page lock when partitioned, shared or exclusive (by `flags`
    /// intent, `RDWR` meaning write) in shared mode, exclusive otherwise.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` if the engine rejects the request.
    fn lock_smart(&self, key: &[u8], flags: OpenFlags) -> CoreResult<()> {
        self.with_session(|s| s.lock_blocking(LockKind::Smart, Some(key), flags))
    }

    /// Takes the smart lock or fails.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` if another owner holds a conflicting lock.
    fn try_lock_smart(&self, key: &[u8], flags: OpenFlags) -> CoreResult<()> {
        self.with_session(|s| s.lock_or_fail(LockKind::Smart, Some(key), flags))
    }

    /// Tries the smart lock without failing when busy.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` only if the engine rejects the request.
    fn probe_lock_smart(&self, key: &[u8], flags: OpenFlags) -> CoreResult<LockProbe> {
        self.with_session(|s| s.lock_probe(LockKind::Smart, Some(key), flags))
    }

    /// Releases one level of the smart lock. `flags` must match the ones
    /// used to take it.
    ///
    /// # Errors
    ///
    /// Returns `UnlockFailed` if this handle does not hold it.
    fn unlock_smart(&self, key: &[u8], flags: OpenFlags) -> CoreResult<()> {
        self.with_session(|s| s.unlock(LockKind::Smart, Some(key), flags))
    }

    /// Takes the smart lock and returns a guard that releases it.
    ///
    /// # Errors
    ///
    /// As for [`lock_smart`](Self::lock_smart).
    fn smart_lock_guard(&self, key: &[u8], flags: OpenFlags) -> CoreResult<SmartLock<'_, Self>>
    where
        Self: Sized,
    {
        self.lock_smart(key, flags)?;
        Ok(SmartLock::new(self, key, flags))
    }

    // === Shared lock ===

    /// Takes a shared lock, waiting if needed.
    ///
    /// # Errors
    ///
    /// Returns `SharedLockViolation` if the store was not opened with
    /// shared locks, whatever else is held.
    fn shared_lock(&self) -> CoreResult<()> {
        self.with_session(|s| s.lock_blocking(LockKind::Shared, None, OpenFlags::RDONLY))
    }

    /// Takes a shared lock or fails.
    ///
    /// # Errors
    ///
    /// Returns `SharedLockViolation` without shared locks, `LockFailed`
    /// if a writer holds the store.
    fn try_shared_lock(&self) -> CoreResult<()> {
        self.with_session(|s| s.lock_or_fail(LockKind::Shared, None, OpenFlags::RDONLY))
    }

    /// Tries a shared lock without failing when busy.
    ///
    /// # Errors
    ///
    /// Returns `SharedLockViolation` without shared locks.
    fn probe_shared_lock(&self) -> CoreResult<LockProbe> {
        self.with_session(|s| s.lock_probe(LockKind::Shared, None, OpenFlags::RDONLY))
    }

    /// Releases one level of a shared lock.
    ///
    /// # Errors
    ///
    /// Returns `SharedLockViolation` without shared locks, `UnlockFailed`
    /// if this handle holds none.
    fn shared_unlock(&self) -> CoreResult<()> {
        self.with_session(|s| s.unlock(LockKind::Shared, None, OpenFlags::RDONLY))
    }

    /// Takes a shared lock and returns a guard that releases it.
    ///
    /// # Errors
    ///
    /// As for [`shared_lock`](Self::shared_lock).
    fn shared_lock_guard(&self) -> CoreResult<SharedLock<'_, Self>>
    where
        Self: Sized,
    {
        self.shared_lock()?;
        Ok(SharedLock::new(self))
    }

    /// Returns true if any owner holds a lock on the store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn is_locked(&self) -> CoreResult<bool> {
        self.with_session(|s| s.is_locked())
    }

    /// Returns true if this handle holds a lock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn is_owned(&self) -> CoreResult<bool> {
        self.with_session(|s| s.is_owned())
    }

    // === Hashing ===

    /// Changes the hash function.
    ///
    /// Entries already stored are not rehashed and become unreachable by
    /// key lookup under a different hash.
    ///
    /// # Errors
    ///
    /// Returns `Engine` if the engine rejects the hash.
    fn set_hash(&self, hash: HashFunction) -> CoreResult<()> {
        self.with_session(|s| s.set_hash(hash))
    }

    /// Returns the store's hash function.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn hash(&self) -> CoreResult<HashFunction> {
        self.with_session(|s| s.hash())
    }

    /// Returns the numeric code of the store's hash function.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn hash_code(&self) -> CoreResult<i32> {
        self.hash().map(HashFunction::code)
    }

    /// Hashes `key` with `hash`.
    ///
    /// # Errors
    ///
    /// Returns `Engine` if the engine cannot compute `hash`.
    fn hash_value(&self, key: &[u8], hash: HashFunction) -> CoreResult<u32> {
        self.with_session(|s| s.hash_value(key, hash))
    }

    // === Maintenance ===

    /// Flushes dirty pages.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn sync(&self) -> CoreResult<()> {
        self.with_session(|s| s.maintain("sync", |e, t| e.sync(t)))
    }

    /// Flushes dirty pages and file metadata.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure, including a closed descriptor.
    fn fsync(&self) -> CoreResult<()> {
        self.with_session(|s| s.maintain("fsync", |e, t| e.fsync(t)))
    }

    /// Compacts the store to the fewest pages that hold its data.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn compress_tree(&self) -> CoreResult<()> {
        self.with_session(|s| s.maintain("compress_tree", |e, t| e.compress_tree(t)))
    }

    /// Removes all data and resets the store to its minimum size.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn truncate(&self) -> CoreResult<()> {
        self.with_session(|s| s.maintain("truncate", |e, t| e.truncate(t)))
    }

    /// Removes all data, keeping the page layout.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn purge(&self) -> CoreResult<()> {
        self.with_session(|s| s.maintain("purge", |e, t| e.purge(t)))
    }

    /// Grows the store to at least `pages` pages.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn pre_split(&self, pages: u32) -> CoreResult<()> {
        self.with_session(|s| s.maintain("pre_split", |e, t| e.pre_split(t, pages)))
    }

    /// Sets the size above which values spill out of their page.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn set_spill_size(&self, bytes: u32) -> CoreResult<()> {
        self.with_session(|s| s.maintain("set_spill_size", |e, t| e.set_spill_size(t, bytes)))
    }

    /// Caps the store at `max_pages` pages.
    ///
    /// A write that overflows its page grows the store up to the limit,
    /// then hands that page's entries to `shake`, and fails with a `Store`
    /// error wrapping `NoSpace` if there is still no room. `shake` runs
    /// with the store locked and must not use the store.
    ///
    /// # Errors
    ///
    /// Returns `Engine` if `max_pages` is 0 or below the current page
    /// count.
    fn set_limit_size(&self, max_pages: u32, shake: Option<ShakeFn>) -> CoreResult<()> {
        self.with_session(|s| s.maintain("limit_size", |e, t| e.limit_size(t, max_pages, shake)))
    }

    /// Deletes every entry `decide` answers [`PruneDecision::Delete`] for
    /// and returns how many went.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure, including a read-only handle.
    fn prune(
        &self,
        mut decide: impl FnMut(&[u8], &[u8]) -> PruneDecision,
    ) -> CoreResult<usize> {
        self.with_session(|s| s.maintain("prune", |e, t| e.prune(t, &mut decide)))
    }

    /// Replaces this store's content with the store at `new_path`, which
    /// is consumed. Every handle on this store sees the new content on its
    /// next access.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn replace_db(&self, new_path: &Path) -> CoreResult<()> {
        self.with_session(|s| s.maintain("replace_db", |e, t| e.replace_db(t, new_path)))
    }

    /// Replaces the store at `old_path` with the store at `new_path`.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on engine failure.
    fn replace_file(&self, old_path: &Path, new_path: &Path) -> CoreResult<()> {
        self.with_session(|s| s.maintain("replace_file", |e, _| e.replace_file(old_path, new_path)))
    }

    // === Diagnostics ===

    /// Returns the store size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn size(&self) -> CoreResult<u64> {
        self.with_session(|s| s.geometry()).map(|g| g.size)
    }

    /// Returns the size limit in bytes, 0 when unlimited.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn limit_size(&self) -> CoreResult<u64> {
        self.with_session(|s| s.geometry()).map(|g| g.limit_size)
    }

    /// Returns the page size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn page_size(&self) -> CoreResult<u32> {
        self.with_session(|s| s.geometry()).map(|g| g.page_size)
    }

    /// Returns the entry alignment code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the handle is closed.
    fn alignment(&self) -> CoreResult<u32> {
        self.with_session(|s| s.geometry()).map(|g| g.alignment)
    }
}

/// Iterator over every entry of a store, from [`MapStore::entries`].
#[derive(Debug)]
pub struct Entries<'a, S> {
    store: &'a S,
    cursor: Cursor,
    done: bool,
}

impl<S: MapStore> Iterator for Entries<'_, S> {
    type Item = CoreResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = if self.cursor.is_positioned() {
            self.store.next(&mut self.cursor)
        } else {
            self.store.first(&mut self.cursor)
        };
        match step {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
