//! The store engine contract.

use crate::error::EngineResult;
use crate::hash::HashFunction;
use crate::types::{
    Geometry, IterState, LockKind, LockWait, OpenFlags, PruneDecision, ResourceToken, ShakeFn,
    StoreFlags, StoreOutcome,
};
use std::path::Path;

/// A handle-based key/value store engine.
///
/// Engines hand out opaque [`ResourceToken`]s from [`open`](Self::open) and
/// [`duplicate`](Self::duplicate). A token is not reentrant: callers must
/// not issue concurrent operations on the same token. Distinct tokens may
/// be used from different threads at once.
///
/// Engines do not guard against use of a released token beyond reporting
/// `BadToken`; preventing double release is the caller's job.
///
/// # Invariants
///
/// - `open` and `duplicate` never return [`ResourceToken::NONE`]
/// - Locks are owned by the token that acquired them and nest per owner
/// - `close` releases every lock the token still holds
///
/// # Implementors
///
/// - [`super::InMemoryEngine`] - Thread-safe reference engine
pub trait StoreEngine: Send + Sync {
    /// Performs one-time engine bring-up. Every other call fails with
    /// `NotInitialized` until this has succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be brought up.
    fn initialize(&self) -> EngineResult<()>;

    /// Opens (or creates) the store at `path`.
    ///
    /// # Arguments
    ///
    /// * `flags` - Open-mode and lock-mode flags
    /// * `mode` - Permission bits for a newly created store
    /// * `page_size` - Page size in bytes, or 0 for the engine default
    /// * `presize` - Initial size in bytes for a newly created store
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the store does not exist and `CREAT` is not
    /// set, or `InvalidArgument` for rejected parameters.
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
        page_size: u32,
        presize: u64,
    ) -> EngineResult<ResourceToken>;

    /// Releases a token and every lock it holds.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn close(&self, token: ResourceToken) -> EngineResult<()>;

    /// Creates a new token bound to the same store.
    ///
    /// The duplicate has its own lock ownership.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn duplicate(&self, token: ResourceToken) -> EngineResult<ResourceToken>;

    /// Closes the file descriptor backing a token, leaving the token live.
    ///
    /// # Errors
    ///
    /// Returns `BadFileDescriptor` if it was already closed.
    fn close_fd(&self, token: ResourceToken) -> EngineResult<()>;

    /// Writes `value` under `key`.
    ///
    /// Returns [`StoreOutcome::Exists`] when an insert finds the key
    /// present. A cursor, if given, is positioned on the written entry.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a modify of a missing key, `ReadOnly` for a
    /// read-only token, or `InvalidArgument` for a zero-length key.
    fn store(
        &self,
        token: ResourceToken,
        key: &[u8],
        value: &[u8],
        flags: StoreFlags,
        cursor: Option<&mut IterState>,
    ) -> EngineResult<StoreOutcome>;

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent.
    fn fetch(
        &self,
        token: ResourceToken,
        key: &[u8],
        cursor: Option<&mut IterState>,
    ) -> EngineResult<Vec<u8>>;

    /// Reads the next duplicate of `key` after the cursor position.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` once every duplicate has been visited.
    fn fetch_dup(
        &self,
        token: ResourceToken,
        key: &[u8],
        cursor: &mut IterState,
    ) -> EngineResult<Vec<u8>>;

    /// Deletes the first entry stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent.
    fn delete(&self, token: ResourceToken, key: &[u8]) -> EngineResult<()>;

    /// Deletes the entry the cursor is on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a cursor that was never positioned,
    /// and `NotFound` if its entry was already deleted.
    fn delete_at(&self, token: ResourceToken, cursor: &mut IterState) -> EngineResult<()>;

    /// Resets the cursor and returns the first entry, or `None` if empty.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn first(
        &self,
        token: ResourceToken,
        cursor: &mut IterState,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Advances the cursor, returning `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn next(
        &self,
        token: ResourceToken,
        cursor: &mut IterState,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Acquires a lock for `token`.
    ///
    /// `key` selects the page for partition and smart locks. `flags`
    /// carries the caller's access intent for smart locks (`RDWR` means
    /// write). With [`LockWait::Try`] this returns `false` instead of
    /// waiting.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a page lock is requested without a key.
    fn acquire_lock(
        &self,
        token: ResourceToken,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
        wait: LockWait,
    ) -> EngineResult<bool>;

    /// Releases one level of a lock held by `token`.
    ///
    /// # Errors
    ///
    /// Returns `NotLockOwner` if `token` does not hold the lock.
    fn release_lock(
        &self,
        token: ResourceToken,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
    ) -> EngineResult<()>;

    /// Returns true if any token holds a lock on the store.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn is_locked(&self, token: ResourceToken) -> EngineResult<bool>;

    /// Returns true if `token` itself holds a lock.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn is_owned(&self, token: ResourceToken) -> EngineResult<bool>;

    /// Changes the store's hash function. Existing keys are not moved.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for a hash this engine cannot compute.
    fn set_hash(&self, token: ResourceToken, hash: HashFunction) -> EngineResult<()>;

    /// Returns the store's hash function.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn hash(&self, token: ResourceToken) -> EngineResult<HashFunction>;

    /// Hashes `key` with `hash`, independent of any store.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for a hash this engine cannot compute.
    fn hash_value(&self, key: &[u8], hash: HashFunction) -> EngineResult<u32>;

    /// Flushes dirty pages.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn sync(&self, token: ResourceToken) -> EngineResult<()>;

    /// Flushes dirty pages and file metadata.
    ///
    /// # Errors
    ///
    /// Returns `BadFileDescriptor` if the descriptor was closed.
    fn fsync(&self, token: ResourceToken) -> EngineResult<()>;

    /// Shrinks the store to the fewest pages that hold its data.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for a read-only token.
    fn compress_tree(&self, token: ResourceToken) -> EngineResult<()>;

    /// Resets the store to a single empty page.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for a read-only token.
    fn truncate(&self, token: ResourceToken) -> EngineResult<()>;

    /// Removes every entry, keeping the page layout.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for a read-only token.
    fn purge(&self, token: ResourceToken) -> EngineResult<()>;

    /// Grows the store to at least `pages` pages.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for a read-only token.
    fn pre_split(&self, token: ResourceToken, pages: u32) -> EngineResult<()>;

    /// Sets the size above which values spill out of their page.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `bytes` exceeds the page size.
    fn set_spill_size(&self, token: ResourceToken, bytes: u32) -> EngineResult<()>;

    /// Caps the store at `max_pages` pages.
    ///
    /// Once limited, a page holds at most one page size of data. A write
    /// that overflows its page first grows the store up to the limit, then
    /// runs `shake` over that page's entries, and only then fails with
    /// `NoSpace`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `max_pages` is 0 or smaller than the
    /// store's current page count.
    fn limit_size(
        &self,
        token: ResourceToken,
        max_pages: u32,
        shake: Option<ShakeFn>,
    ) -> EngineResult<()>;

    /// Visits every entry and deletes those `prune` rejects. Returns the
    /// number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for a read-only token.
    fn prune(
        &self,
        token: ResourceToken,
        prune: &mut dyn FnMut(&[u8], &[u8]) -> PruneDecision,
    ) -> EngineResult<usize>;

    /// Replaces the token's store with the store at `new_path`, which is
    /// consumed. Runs while no other token holds any lock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `new_path` does not exist.
    fn replace_db(&self, token: ResourceToken, new_path: &Path) -> EngineResult<()>;

    /// Replaces the store at `old_path` with the store at `new_path`,
    /// which is consumed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either path does not exist.
    fn replace_file(&self, old_path: &Path, new_path: &Path) -> EngineResult<()>;

    /// Returns size and layout facts.
    ///
    /// # Errors
    ///
    /// Returns `BadToken` if the token is not live.
    fn geometry(&self, token: ResourceToken) -> EngineResult<Geometry>;
}
