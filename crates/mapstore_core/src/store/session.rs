//! Token-bound engine calls with error mapping.

use crate::error::{CoreError, CoreResult};
use crate::finalizer::ReleaseFn;
use crate::stats::HandleStats;
use crate::store::LockProbe;
use mapstore_engine::{
    EngineError, EngineResult, Geometry, HashFunction, IterState, LockKind, LockWait, OpenFlags,
    ResourceToken, StoreEngine, StoreFlags, StoreOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What every handle on one store shares: the engine, stats, path and
/// open flags.
#[derive(Clone)]
pub(crate) struct Binding {
    engine: Arc<dyn StoreEngine>,
    stats: Arc<HandleStats>,
    path: Arc<PathBuf>,
    flags: OpenFlags,
}

impl Binding {
    pub fn new(
        engine: Arc<dyn StoreEngine>,
        stats: Arc<HandleStats>,
        path: PathBuf,
        flags: OpenFlags,
    ) -> Self {
        Self {
            engine,
            stats,
            path: Arc::new(path),
            flags,
        }
    }

    pub fn engine(&self) -> &Arc<dyn StoreEngine> {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<HandleStats> {
        &self.stats
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the store was opened with shared (read-write) locks.
    pub fn shared(&self) -> bool {
        self.flags.shared_locks()
    }

    /// Release function that closes a token of this store.
    pub fn release_fn(&self) -> ReleaseFn {
        let engine = Arc::clone(&self.engine);
        let path = Arc::clone(&self.path);
        Arc::new(move |token| {
            engine.close(token).map_err(|source| CoreError::Engine {
                path: path.to_path_buf(),
                operation: "close",
                source,
            })
        })
    }

    pub fn engine_error(&self, operation: &'static str, source: EngineError) -> CoreError {
        CoreError::Engine {
            path: self.path.to_path_buf(),
            operation,
            source,
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// A validated handle bound to a live token for the duration of one
/// [`crate::MapStore::with_session`] call.
///
/// Sessions are only created by handle types after their validity check,
/// so every engine call made through one uses a live token.
pub struct Session<'a> {
    binding: &'a Binding,
    token: ResourceToken,
}

impl<'a> Session<'a> {
    pub(crate) fn new(binding: &'a Binding, token: ResourceToken) -> Self {
        Self { binding, token }
    }

    /// Returns the store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.binding.path()
    }

    /// Returns true if the store was opened with shared locks.
    #[must_use]
    pub fn shared_locks(&self) -> bool {
        self.binding.shared()
    }

    pub(crate) fn token(&self) -> ResourceToken {
        self.token
    }

    fn engine(&self) -> &dyn StoreEngine {
        self.binding.engine().as_ref()
    }

    fn path_buf(&self) -> PathBuf {
        self.binding.path().to_path_buf()
    }

    fn no_entry_or(
        &self,
        operation: &'static str,
        source: EngineError,
        other: impl FnOnce(PathBuf, EngineError) -> CoreError,
    ) -> CoreError {
        if source.is_not_found() {
            CoreError::NoEntry {
                path: self.path_buf(),
                operation,
            }
        } else {
            other(self.path_buf(), source)
        }
    }

    pub(crate) fn store(
        &self,
        key: &[u8],
        value: &[u8],
        flags: StoreFlags,
        cursor: Option<&mut IterState>,
    ) -> CoreResult<bool> {
        match self.engine().store(self.token, key, value, flags, cursor) {
            Ok(StoreOutcome::Stored) => Ok(true),
            Ok(StoreOutcome::Exists) => Ok(false),
            Err(source) => Err(CoreError::Store {
                path: self.path_buf(),
                source,
            }),
        }
    }

    pub(crate) fn fetch(&self, key: &[u8], cursor: Option<&mut IterState>) -> CoreResult<Vec<u8>> {
        self.engine()
            .fetch(self.token, key, cursor)
            .map_err(|e| self.no_entry_or("fetch", e, |path, source| CoreError::Fetch { path, source }))
    }

    pub(crate) fn fetch_dup(&self, key: &[u8], cursor: &mut IterState) -> CoreResult<Vec<u8>> {
        self.engine()
            .fetch_dup(self.token, key, cursor)
            .map_err(|e| {
                self.no_entry_or("fetch_dup", e, |path, source| CoreError::Fetch { path, source })
            })
    }

    pub(crate) fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.engine()
            .delete(self.token, key)
            .map_err(|e| self.no_entry_or("delete", e, |path, source| CoreError::Delete { path, source }))
    }

    pub(crate) fn delete_at(&self, cursor: &mut IterState) -> CoreResult<()> {
        self.engine().delete_at(self.token, cursor).map_err(|e| {
            self.no_entry_or("delete", e, |path, source| CoreError::Delete { path, source })
        })
    }

    pub(crate) fn first(&self, cursor: &mut IterState) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.engine()
            .first(self.token, cursor)
            .map_err(|e| self.binding.engine_error("first", e))
    }

    pub(crate) fn next(&self, cursor: &mut IterState) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.engine()
            .next(self.token, cursor)
            .map_err(|e| self.binding.engine_error("next", e))
    }

    fn check_shared(&self, kind: LockKind) -> CoreResult<()> {
        if kind == LockKind::Shared && !self.binding.shared() {
            return Err(CoreError::SharedLockViolation {
                path: self.path_buf(),
            });
        }
        Ok(())
    }

    fn acquire(
        &self,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
        wait: LockWait,
    ) -> CoreResult<bool> {
        self.check_shared(kind)?;
        self.engine()
            .acquire_lock(self.token, kind, key, flags, wait)
            .map_err(|e| CoreError::LockFailed {
                path: self.path_buf(),
                message: format!("{} lock: {e}", kind.name()),
            })
    }

    pub(crate) fn lock_blocking(
        &self,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
    ) -> CoreResult<()> {
        if self.acquire(kind, key, flags, LockWait::Block)? {
            Ok(())
        } else {
            Err(CoreError::LockFailed {
                path: self.path_buf(),
                message: format!("{} lock not granted", kind.name()),
            })
        }
    }

    pub(crate) fn lock_probe(
        &self,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
    ) -> CoreResult<LockProbe> {
        if self.acquire(kind, key, flags, LockWait::Try)? {
            Ok(LockProbe::Acquired)
        } else {
            Ok(LockProbe::Busy)
        }
    }

    pub(crate) fn lock_or_fail(
        &self,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
    ) -> CoreResult<()> {
        match self.lock_probe(kind, key, flags)? {
            LockProbe::Acquired => Ok(()),
            LockProbe::Busy => {
                self.binding.stats().record_lock_failure();
                Err(CoreError::LockFailed {
                    path: self.path_buf(),
                    message: format!("{} lock is held by another owner", kind.name()),
                })
            }
        }
    }

    pub(crate) fn unlock(
        &self,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
    ) -> CoreResult<()> {
        self.check_shared(kind)?;
        self.engine()
            .release_lock(self.token, kind, key, flags)
            .map_err(|e| CoreError::UnlockFailed {
                path: self.path_buf(),
                message: format!("{} lock: {e}", kind.name()),
            })
    }

    pub(crate) fn is_locked(&self) -> CoreResult<bool> {
        self.engine()
            .is_locked(self.token)
            .map_err(|e| self.binding.engine_error("is_locked", e))
    }

    pub(crate) fn is_owned(&self) -> CoreResult<bool> {
        self.engine()
            .is_owned(self.token)
            .map_err(|e| self.binding.engine_error("is_owned", e))
    }

    pub(crate) fn set_hash(&self, hash: HashFunction) -> CoreResult<()> {
        self.engine()
            .set_hash(self.token, hash)
            .map_err(|e| self.binding.engine_error("set_hash", e))
    }

    pub(crate) fn hash(&self) -> CoreResult<HashFunction> {
        self.engine()
            .hash(self.token)
            .map_err(|e| self.binding.engine_error("hash", e))
    }

    pub(crate) fn hash_value(&self, key: &[u8], hash: HashFunction) -> CoreResult<u32> {
        self.engine()
            .hash_value(key, hash)
            .map_err(|e| self.binding.engine_error("hash_value", e))
    }

    pub(crate) fn geometry(&self) -> CoreResult<Geometry> {
        self.engine()
            .geometry(self.token)
            .map_err(|e| self.binding.engine_error("geometry", e))
    }

    /// Runs a maintenance call, mapping failures to `Engine` errors.
    pub(crate) fn maintain<R>(
        &self,
        operation: &'static str,
        call: impl FnOnce(&dyn StoreEngine, ResourceToken) -> EngineResult<R>,
    ) -> CoreResult<R> {
        call(self.engine(), self.token).map_err(|e| self.binding.engine_error(operation, e))
    }

    pub(crate) fn close_fd(&self) -> CoreResult<()> {
        self.maintain("close_fd", |e, t| e.close_fd(t))
    }

    pub(crate) fn duplicate(&self) -> CoreResult<ResourceToken> {
        let token = self
            .engine()
            .duplicate(self.token)
            .map_err(|e| self.binding.engine_error("duplicate", e))?;
        self.binding.stats().record_duplicate();
        Ok(token)
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.binding.path())
            .field("token", &self.token)
            .finish()
    }
}
