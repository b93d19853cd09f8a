//! In-memory reference engine.

mod locks;
mod pages;

use self::locks::LockTable;
use self::pages::PageTable;
use crate::engine::StoreEngine;
use crate::error::{EngineError, EngineResult};
use crate::hash::HashFunction;
use crate::types::{
    Geometry, IterState, LockKind, LockWait, OpenFlags, PruneDecision, ResourceToken, ShakeFn,
    StoreFlags, StoreMode, StoreOutcome,
};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: u32 = 128;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 16 * 1024 * 1024;
/// Page size used when the caller passes 0.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

const MAX_PAGES: usize = 1 << 16;

struct SizeLimit {
    max_pages: usize,
    shake: Option<ShakeFn>,
}

impl fmt::Debug for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeLimit")
            .field("max_pages", &self.max_pages)
            .field("shake", &self.shake.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct FileState {
    pages: PageTable,
    locks: LockTable,
    limit: Option<SizeLimit>,
}

impl FileState {
    /// Most pages the store may grow to.
    fn page_cap(&self) -> usize {
        self.limit.as_ref().map_or(MAX_PAGES, |limit| limit.max_pages)
    }

    /// Under a size limit, makes room for a write: grow toward the limit,
    /// then shake the target page, then give up.
    fn make_room(&mut self, key: &[u8], value_len: usize, mode: StoreMode) -> EngineResult<()> {
        let Some(limit) = self.limit.as_mut() else {
            return Ok(());
        };
        let page_size = self.pages.page_size() as usize;

        let (mut page, mut bytes) = self.pages.bytes_after_store(key, value_len, mode)?;
        while bytes > page_size && self.pages.page_count() < limit.max_pages {
            let grown = (self.pages.page_count() * 2).min(limit.max_pages);
            self.pages.resize(grown)?;
            (page, bytes) = self.pages.bytes_after_store(key, value_len, mode)?;
        }
        if bytes > page_size {
            if let Some(shake) = limit.shake.as_mut() {
                self.pages.retain_page(page, &mut **shake);
                (page, bytes) = self.pages.bytes_after_store(key, value_len, mode)?;
            }
        }
        if bytes > page_size {
            return Err(EngineError::NoSpace {
                page,
                max_pages: limit.max_pages,
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SharedFile {
    state: Mutex<FileState>,
    changed: Condvar,
}

impl SharedFile {
    fn new(pages: PageTable) -> Self {
        Self {
            state: Mutex::new(FileState {
                pages,
                locks: LockTable::default(),
                limit: None,
            }),
            changed: Condvar::new(),
        }
    }
}

#[derive(Debug)]
struct HandleEntry {
    file: Arc<SharedFile>,
    path: PathBuf,
    flags: OpenFlags,
    fd_open: bool,
}

/// What a data operation touches, for the implicit lock it takes.
#[derive(Debug, Clone, Copy)]
enum Access<'k> {
    Read(Option<&'k [u8]>),
    Write(Option<&'k [u8]>),
    Whole,
}

/// A thread-safe engine keeping every store in memory.
///
/// Stores are named by path inside the engine's own namespace; nothing
/// touches the host file system. Data operations wait while another token
/// holds a conflicting lock, so tokens used from different threads behave
/// like separate processes sharing one mapped file.
///
/// # Example
///
/// ```rust
/// use mapstore_engine::{InMemoryEngine, OpenFlags, StoreEngine, StoreMode};
/// use std::path::Path;
///
/// let engine = InMemoryEngine::new();
/// engine.initialize().unwrap();
/// let token = engine
///     .open(Path::new("/db"), OpenFlags::RDWR | OpenFlags::CREAT, 0o644, 0, 0)
///     .unwrap();
/// engine.store(token, b"k", b"v", StoreMode::Replace.into(), None).unwrap();
/// assert_eq!(engine.fetch(token, b"k", None).unwrap(), b"v");
/// engine.close(token).unwrap();
/// ```
#[derive(Debug)]
pub struct InMemoryEngine {
    files: Mutex<HashMap<PathBuf, Arc<SharedFile>>>,
    handles: RwLock<HashMap<u64, HandleEntry>>,
    next_token: AtomicU64,
    initialized: AtomicBool,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
        }
    }
}

impl InMemoryEngine {
    /// Creates an engine with no stores. Call
    /// [`initialize`](StoreEngine::initialize) before use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a store exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    /// Returns the number of live tokens.
    #[must_use]
    pub fn live_tokens(&self) -> usize {
        self.handles.read().len()
    }

    fn ensure_initialized(&self) -> EngineResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    fn issue_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    fn binding(&self, token: ResourceToken) -> EngineResult<(Arc<SharedFile>, OpenFlags)> {
        self.ensure_initialized()?;
        let handles = self.handles.read();
        let entry = handles
            .get(&token.as_raw())
            .ok_or(EngineError::BadToken(token.as_raw()))?;
        Ok((Arc::clone(&entry.file), entry.flags))
    }

    fn page_size(page_size: u32) -> EngineResult<u32> {
        match page_size {
            0 => Ok(DEFAULT_PAGE_SIZE),
            MIN_PAGE_SIZE..=MAX_PAGE_SIZE => Ok(page_size),
            _ => Err(EngineError::invalid_argument(format!(
                "page size {page_size} outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}"
            ))),
        }
    }

    /// Runs `op` on the token's store once the implicit lock for `access`
    /// is available.
    fn with_store<R>(
        &self,
        token: ResourceToken,
        access: Access<'_>,
        op: impl FnOnce(&mut FileState) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let (file, flags) = self.binding(token)?;
        if matches!(access, Access::Write(_) | Access::Whole) && !flags.writable() {
            return Err(EngineError::ReadOnly);
        }
        let mut state = file.state.lock();
        if !flags.contains(OpenFlags::OPEN_NOLOCK) {
            Self::wait_for_access(&file, &mut state, token.as_raw(), access)?;
        }
        let result = op(&mut *state);
        drop(state);
        if matches!(access, Access::Whole) {
            file.changed.notify_all();
        }
        result
    }

    fn wait_for_access(
        file: &SharedFile,
        state: &mut MutexGuard<'_, FileState>,
        owner: u64,
        access: Access<'_>,
    ) -> EngineResult<()> {
        loop {
            let blocked = match access {
                Access::Read(key) => {
                    let page = key.map(|k| state.pages.page_of(k)).transpose()?;
                    state.locks.read_blocked(owner, page)
                }
                Access::Write(key) => {
                    let page = key.map(|k| state.pages.page_of(k)).transpose()?;
                    state.locks.write_blocked(owner, page)
                }
                Access::Whole => state.locks.held_by_other(owner),
            };
            if !blocked {
                return Ok(());
            }
            file.changed.wait(state);
        }
    }

    /// Resolves the lock kind actually taken for a request.
    fn resolve(
        kind: LockKind,
        store_flags: OpenFlags,
        intent: OpenFlags,
    ) -> LockKind {
        let partitioned = store_flags.contains(OpenFlags::PARTITIONED_LOCKS);
        let shared = store_flags.shared_locks();
        match kind {
            LockKind::Partition if partitioned => LockKind::Partition,
            LockKind::Partition => LockKind::Exclusive,
            LockKind::Shared if shared => LockKind::Shared,
            LockKind::Shared => LockKind::Exclusive,
            LockKind::Smart if partitioned => LockKind::Partition,
            LockKind::Smart if shared && !intent.writable() => LockKind::Shared,
            LockKind::Smart | LockKind::Exclusive => LockKind::Exclusive,
        }
    }

    fn lock_page(state: &FileState, key: Option<&[u8]>) -> EngineResult<usize> {
        let key = key.ok_or_else(|| EngineError::invalid_argument("page lock needs a key"))?;
        state.pages.page_of(key)
    }

    fn swap_in(&self, target: &Arc<SharedFile>, owner: u64, source_path: &Path) -> EngineResult<()> {
        let source = self
            .files
            .lock()
            .get(source_path)
            .cloned()
            .ok_or_else(|| EngineError::not_found(source_path.display().to_string()))?;
        if Arc::ptr_eq(&source, target) {
            return Err(EngineError::invalid_argument("cannot replace a store with itself"));
        }
        let pages = source.state.lock().pages.clone();

        let mut state = target.state.lock();
        Self::wait_for_access(target, &mut state, owner, Access::Whole)?;
        state.pages = pages;
        drop(state);
        target.changed.notify_all();

        self.files.lock().remove(source_path);
        Ok(())
    }
}

impl StoreEngine for InMemoryEngine {
    fn initialize(&self) -> EngineResult<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        _mode: u32,
        page_size: u32,
        presize: u64,
    ) -> EngineResult<ResourceToken> {
        self.ensure_initialized()?;
        if path.as_os_str().is_empty() {
            return Err(EngineError::invalid_argument("empty path"));
        }
        if flags.contains(OpenFlags::RW_LOCKS) && flags.contains(OpenFlags::PARTITIONED_LOCKS) {
            return Err(EngineError::invalid_argument(
                "RW_LOCKS and PARTITIONED_LOCKS are mutually exclusive",
            ));
        }
        let page_size = Self::page_size(page_size)?;

        let file = {
            let mut files = self.files.lock();
            match files.get(path) {
                Some(file) => Arc::clone(file),
                None if flags.contains(OpenFlags::CREAT) => {
                    let pages = (presize / u64::from(page_size)).clamp(1, MAX_PAGES as u64);
                    let file = Arc::new(SharedFile::new(PageTable::new(page_size, pages as usize)));
                    files.insert(path.to_path_buf(), Arc::clone(&file));
                    file
                }
                None => return Err(EngineError::not_found(path.display().to_string())),
            }
        };
        if flags.contains(OpenFlags::TRUNC) && flags.writable() {
            file.state.lock().pages.clear();
        }

        let token = self.issue_token();
        self.handles.write().insert(
            token,
            HandleEntry {
                file,
                path: path.to_path_buf(),
                flags,
                fd_open: true,
            },
        );
        Ok(ResourceToken::from_raw(token))
    }

    fn close(&self, token: ResourceToken) -> EngineResult<()> {
        self.ensure_initialized()?;
        let entry = self
            .handles
            .write()
            .remove(&token.as_raw())
            .ok_or(EngineError::BadToken(token.as_raw()))?;
        entry.file.state.lock().locks.release_all(token.as_raw());
        entry.file.changed.notify_all();
        Ok(())
    }

    fn duplicate(&self, token: ResourceToken) -> EngineResult<ResourceToken> {
        self.ensure_initialized()?;
        let mut handles = self.handles.write();
        let entry = handles
            .get(&token.as_raw())
            .ok_or(EngineError::BadToken(token.as_raw()))?;
        let copy = HandleEntry {
            file: Arc::clone(&entry.file),
            path: entry.path.clone(),
            flags: entry.flags,
            fd_open: true,
        };
        let dup = self.issue_token();
        handles.insert(dup, copy);
        Ok(ResourceToken::from_raw(dup))
    }

    fn close_fd(&self, token: ResourceToken) -> EngineResult<()> {
        self.ensure_initialized()?;
        let mut handles = self.handles.write();
        let entry = handles
            .get_mut(&token.as_raw())
            .ok_or(EngineError::BadToken(token.as_raw()))?;
        if !entry.fd_open {
            return Err(EngineError::BadFileDescriptor);
        }
        entry.fd_open = false;
        Ok(())
    }

    fn store(
        &self,
        token: ResourceToken,
        key: &[u8],
        value: &[u8],
        flags: StoreFlags,
        cursor: Option<&mut IterState>,
    ) -> EngineResult<StoreOutcome> {
        self.with_store(token, Access::Write(Some(key)), |state| {
            state.make_room(key, value.len(), flags.mode)?;
            state.pages.store(key, value, flags, cursor)
        })
    }

    fn fetch(
        &self,
        token: ResourceToken,
        key: &[u8],
        cursor: Option<&mut IterState>,
    ) -> EngineResult<Vec<u8>> {
        self.with_store(token, Access::Read(Some(key)), |state| {
            state.pages.fetch(key, cursor)
        })
    }

    fn fetch_dup(
        &self,
        token: ResourceToken,
        key: &[u8],
        cursor: &mut IterState,
    ) -> EngineResult<Vec<u8>> {
        self.with_store(token, Access::Read(Some(key)), |state| {
            state.pages.fetch_dup(key, cursor)
        })
    }

    fn delete(&self, token: ResourceToken, key: &[u8]) -> EngineResult<()> {
        self.with_store(token, Access::Write(Some(key)), |state| {
            state.pages.delete(key)
        })
    }

    fn delete_at(&self, token: ResourceToken, cursor: &mut IterState) -> EngineResult<()> {
        self.with_store(token, Access::Write(None), |state| {
            state.pages.delete_at(cursor)
        })
    }

    fn first(
        &self,
        token: ResourceToken,
        cursor: &mut IterState,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        *cursor = IterState::new();
        self.next(token, cursor)
    }

    fn next(
        &self,
        token: ResourceToken,
        cursor: &mut IterState,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.with_store(token, Access::Read(None), |state| {
            Ok(state.pages.next(cursor))
        })
    }

    fn acquire_lock(
        &self,
        token: ResourceToken,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
        wait: LockWait,
    ) -> EngineResult<bool> {
        let (file, store_flags) = self.binding(token)?;
        if store_flags.contains(OpenFlags::OPEN_NOLOCK) {
            return Ok(true);
        }
        let owner = token.as_raw();
        let kind = Self::resolve(kind, store_flags, flags);

        let mut state = file.state.lock();
        let page = match kind {
            LockKind::Partition => Some(Self::lock_page(&state, key)?),
            _ => None,
        };
        loop {
            let acquired = match (kind, page) {
                (LockKind::Partition, Some(page)) => state.locks.try_partition(owner, page),
                (LockKind::Shared, _) => state.locks.try_shared(owner),
                _ => state.locks.try_exclusive(owner),
            };
            if acquired {
                return Ok(true);
            }
            if wait == LockWait::Try {
                return Ok(false);
            }
            file.changed.wait(&mut state);
        }
    }

    fn release_lock(
        &self,
        token: ResourceToken,
        kind: LockKind,
        key: Option<&[u8]>,
        flags: OpenFlags,
    ) -> EngineResult<()> {
        let (file, store_flags) = self.binding(token)?;
        if store_flags.contains(OpenFlags::OPEN_NOLOCK) {
            return Ok(());
        }
        let owner = token.as_raw();
        let kind = Self::resolve(kind, store_flags, flags);

        let mut state = file.state.lock();
        match kind {
            LockKind::Partition => {
                let page = Self::lock_page(&state, key)?;
                state.locks.release_partition(owner, page)?;
            }
            LockKind::Shared => state.locks.release_shared(owner)?,
            _ => state.locks.release_exclusive(owner)?,
        }
        drop(state);
        file.changed.notify_all();
        Ok(())
    }

    fn is_locked(&self, token: ResourceToken) -> EngineResult<bool> {
        let (file, _) = self.binding(token)?;
        let locked = file.state.lock().locks.is_locked();
        Ok(locked)
    }

    fn is_owned(&self, token: ResourceToken) -> EngineResult<bool> {
        let (file, _) = self.binding(token)?;
        let owned = file.state.lock().locks.is_owned(token.as_raw());
        Ok(owned)
    }

    fn set_hash(&self, token: ResourceToken, hash: HashFunction) -> EngineResult<()> {
        self.with_store(token, Access::Whole, |state| state.pages.set_hash(hash))
    }

    fn hash(&self, token: ResourceToken) -> EngineResult<HashFunction> {
        let (file, _) = self.binding(token)?;
        let hash = file.state.lock().pages.hash();
        Ok(hash)
    }

    fn hash_value(&self, key: &[u8], hash: HashFunction) -> EngineResult<u32> {
        hash.hash(key)
    }

    fn sync(&self, token: ResourceToken) -> EngineResult<()> {
        self.binding(token).map(|_| ())
    }

    fn fsync(&self, token: ResourceToken) -> EngineResult<()> {
        self.ensure_initialized()?;
        let handles = self.handles.read();
        let entry = handles
            .get(&token.as_raw())
            .ok_or(EngineError::BadToken(token.as_raw()))?;
        if entry.fd_open {
            Ok(())
        } else {
            Err(EngineError::BadFileDescriptor)
        }
    }

    fn compress_tree(&self, token: ResourceToken) -> EngineResult<()> {
        self.with_store(token, Access::Whole, |state| {
            let pages = state.pages.compact_page_count().min(state.page_cap());
            state.pages.resize(pages)
        })
    }

    fn truncate(&self, token: ResourceToken) -> EngineResult<()> {
        self.with_store(token, Access::Whole, |state| {
            state.pages.clear();
            state.pages.resize(1)
        })
    }

    fn purge(&self, token: ResourceToken) -> EngineResult<()> {
        self.with_store(token, Access::Whole, |state| {
            state.pages.clear();
            Ok(())
        })
    }

    fn pre_split(&self, token: ResourceToken, pages: u32) -> EngineResult<()> {
        let pages = (pages as usize).min(MAX_PAGES);
        self.with_store(token, Access::Whole, |state| {
            if pages > state.page_cap() {
                return Err(EngineError::invalid_argument(format!(
                    "pre-split to {pages} pages exceeds the limit of {}",
                    state.page_cap()
                )));
            }
            if pages > state.pages.page_count() {
                state.pages.resize(pages)?;
            }
            Ok(())
        })
    }

    fn set_spill_size(&self, token: ResourceToken, bytes: u32) -> EngineResult<()> {
        self.with_store(token, Access::Write(None), |state| {
            state.pages.set_spill_size(bytes)
        })
    }

    fn limit_size(
        &self,
        token: ResourceToken,
        max_pages: u32,
        shake: Option<ShakeFn>,
    ) -> EngineResult<()> {
        let max_pages = max_pages as usize;
        if max_pages == 0 || max_pages > MAX_PAGES {
            return Err(EngineError::invalid_argument(format!(
                "page limit {max_pages} outside 1..={MAX_PAGES}"
            )));
        }
        self.with_store(token, Access::Whole, |state| {
            if state.pages.page_count() > max_pages {
                return Err(EngineError::invalid_argument(format!(
                    "store already has {} pages, more than the limit of {max_pages}",
                    state.pages.page_count()
                )));
            }
            state.limit = Some(SizeLimit { max_pages, shake });
            Ok(())
        })
    }

    fn prune(
        &self,
        token: ResourceToken,
        prune: &mut dyn FnMut(&[u8], &[u8]) -> PruneDecision,
    ) -> EngineResult<usize> {
        self.with_store(token, Access::Whole, |state| Ok(state.pages.retain(prune)))
    }

    fn replace_db(&self, token: ResourceToken, new_path: &Path) -> EngineResult<()> {
        let (file, flags) = self.binding(token)?;
        if !flags.writable() {
            return Err(EngineError::ReadOnly);
        }
        self.swap_in(&file, token.as_raw(), new_path)
    }

    fn replace_file(&self, old_path: &Path, new_path: &Path) -> EngineResult<()> {
        self.ensure_initialized()?;
        let target = self
            .files
            .lock()
            .get(old_path)
            .cloned()
            .ok_or_else(|| EngineError::not_found(old_path.display().to_string()))?;
        self.swap_in(&target, 0, new_path)
    }

    fn geometry(&self, token: ResourceToken) -> EngineResult<Geometry> {
        let (file, _) = self.binding(token)?;
        let state = file.state.lock();
        let limit_size = state.limit.as_ref().map_or(0, |limit| {
            limit.max_pages as u64 * u64::from(state.pages.page_size())
        });
        Ok(Geometry {
            size: state.pages.size(),
            limit_size,
            page_size: state.pages.page_size(),
            alignment: 0,
        })
    }
}
