//! Fixed-capacity pool of duplicated store handles.
//!
//! A pool owns one parent handle plus `capacity` duplicates of it. Callers
//! check duplicates out as [`PooledHandle`]s, which are non-owning views:
//! closing or dropping one returns it to the pool. The pool refuses to
//! tear down while anything is checked out.

mod exclusive;
mod pooled;

pub use exclusive::ExclusiveHandle;
pub use pooled::PooledHandle;

use crate::error::{CoreError, CoreResult};
use crate::finalizer::FinalizingHandle;
use crate::lifecycle::Lifecycle;
use crate::store::{Binding, StoreHandle, StoreView};
use mapstore_engine::ResourceToken;
use parking_lot::{Condvar, Mutex};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug)]
struct SlotState {
    free: Vec<usize>,
    exclusive: bool,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct PoolShared {
    binding: Binding,
    parent: FinalizingHandle,
    members: Vec<FinalizingHandle>,
    member_tokens: Vec<ResourceToken>,
    slots: Mutex<SlotState>,
    available: Condvar,
    in_flight: AtomicUsize,
    lifecycle: Lifecycle,
}

impl PoolShared {
    fn capacity(&self) -> usize {
        self.members.len()
    }

    fn view(&self, token: ResourceToken) -> StoreView {
        StoreView::new(self.binding.clone(), token)
    }

    /// Puts a pooled slot back and wakes waiters.
    pub(crate) fn give_back(&self, slot: usize) {
        let mut slots = self.slots.lock();
        slots.free.push(slot);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        drop(slots);
        self.available.notify_all();
        self.binding.stats().record_pool_return();
        debug!(slot, path = %self.binding.path().display(), "returned pooled handle");
    }

    /// Re-admits checkouts after an exclusive handle is done.
    pub(crate) fn end_exclusive(&self) {
        let mut slots = self.slots.lock();
        slots.exclusive = false;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        drop(slots);
        self.available.notify_all();
        debug!(path = %self.binding.path().display(), "released exclusive pool handle");
    }

    /// Closes every member and the parent. Failures are logged; the first
    /// one is recorded in `failure`.
    fn teardown(&self, failure: &mut Option<CoreError>) -> CoreResult<bool> {
        let mut slots = self.slots.lock();
        let outstanding = self.in_flight.load(Ordering::Acquire);
        if outstanding != 0 {
            drop(slots);
            self.binding.stats().record_refused_teardown();
            warn!(
                outstanding,
                capacity = self.capacity(),
                path = %self.binding.path().display(),
                "refusing to close pool with handles checked out"
            );
            return Err(CoreError::PoolBusy {
                outstanding,
                capacity: self.capacity(),
            });
        }
        slots.closed = true;
        drop(slots);
        self.available.notify_all();

        for member in self.members.iter().chain(std::iter::once(&self.parent)) {
            if let Err(err) = member.close() {
                error!(label = member.label(), error = %err, "failed to close pool member");
                if failure.is_none() {
                    *failure = Some(err);
                }
            }
        }
        debug!(path = %self.binding.path().display(), "closed pool");
        Ok(true)
    }
}

/// A fixed-capacity pool of duplicated handles on one store.
///
/// `acquire` blocks while every handle is checked out; the wait is a
/// condition variable, not a spin. The pool is `Send + Sync` and meant to
/// be shared (for example in an `Arc`) by the threads that use it.
///
/// # Example
///
/// ```rust
/// use mapstore_core::{MapStore, OpenOptions, Runtime};
/// use mapstore_engine::{InMemoryEngine, StoreMode};
///
/// let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
/// let pool = runtime.open_pool("/pool-doc", &OpenOptions::new(), 2).unwrap();
///
/// let handle = pool.acquire().unwrap();
/// handle.store(b"k", b"v", StoreMode::Replace).unwrap();
/// drop(handle); // returned to the pool
///
/// assert_eq!(pool.in_flight(), 0);
/// pool.close().unwrap();
/// ```
#[derive(Debug)]
pub struct HandlePool {
    shared: Arc<PoolShared>,
}

impl HandlePool {
    /// Builds a pool of `capacity` duplicates of `parent`, taking
    /// ownership of it.
    ///
    /// # Errors
    ///
    /// Returns `CreatePool` if `capacity` is 0 or the handles cannot be
    /// duplicated, `InvalidState` if `parent` is closed.
    pub fn new(parent: StoreHandle, capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::create_pool("pool capacity must be positive"));
        }
        let (binding, parent) = parent.into_parts();
        let parent_token = parent.token()?;

        let mut members = Vec::with_capacity(capacity);
        let mut member_tokens = Vec::with_capacity(capacity);
        for index in 0..capacity {
            let token = match binding.engine().duplicate(parent_token) {
                Ok(token) => token,
                Err(err) => {
                    for member in members.iter().chain(std::iter::once(&parent)) {
                        if let Err(close_err) = member.close() {
                            error!(label = member.label(), error = %close_err, "failed to close partial pool member");
                        }
                    }
                    return Err(CoreError::create_pool(format!("duplicate {index}: {err}")));
                }
            };
            binding.stats().record_duplicate();
            member_tokens.push(token);
            members.push(FinalizingHandle::new(
                token,
                binding.release_fn(),
                format!("{} [pool {index}]", binding.path().display()),
                Arc::clone(binding.stats()),
            ));
        }
        debug!(capacity, path = %binding.path().display(), "created pool");

        Ok(Self {
            shared: Arc::new(PoolShared {
                binding,
                parent,
                members,
                member_tokens,
                slots: Mutex::new(SlotState {
                    free: (0..capacity).rev().collect(),
                    exclusive: false,
                    closed: false,
                }),
                available: Condvar::new(),
                in_flight: AtomicUsize::new(0),
                lifecycle: Lifecycle::opened(true),
            }),
        })
    }

    /// Returns the number of pooled handles.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Returns the number of handles checked out, counting an exclusive
    /// handle as one.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Returns the store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.shared.binding.path()
    }

    /// Returns whether the pool is closed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if it is.
    pub fn is_closed(&self) -> CoreResult<bool> {
        self.shared.lifecycle.is_closed()
    }

    /// Checks that the pool is open.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if it is closed.
    pub fn validate(&self) -> CoreResult<()> {
        self.is_closed().map(|_| ())
    }

    fn check_out(&self, slot: usize) -> PooledHandle {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        self.shared.binding.stats().record_pool_checkout();
        debug!(slot, path = %self.path().display(), "checked out pooled handle");
        let view = self.shared.view(self.shared.member_tokens[slot]);
        PooledHandle::new(Arc::clone(&self.shared), slot, view)
    }

    /// Checks out a handle, waiting until one is free.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the pool is closed, including while
    /// waiting.
    pub fn acquire(&self) -> CoreResult<PooledHandle> {
        let mut slots = self.shared.slots.lock();
        let mut waited = false;
        let slot = loop {
            if slots.closed {
                return Err(CoreError::invalid_state("pool is closed"));
            }
            if !slots.exclusive {
                if let Some(slot) = slots.free.pop() {
                    break slot;
                }
            }
            if !waited {
                waited = true;
                self.shared.binding.stats().record_pool_wait();
            }
            self.shared.available.wait(&mut slots);
        };
        let handle = self.check_out(slot);
        drop(slots);
        Ok(handle)
    }

    /// Checks out a handle if one is free right now.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the pool is closed.
    pub fn try_acquire(&self) -> CoreResult<Option<PooledHandle>> {
        let mut slots = self.shared.slots.lock();
        if slots.closed {
            return Err(CoreError::invalid_state("pool is closed"));
        }
        if slots.exclusive {
            return Ok(None);
        }
        let handle = slots.free.pop().map(|slot| self.check_out(slot));
        Ok(handle)
    }

    /// Waits until every pooled handle is back, then hands out the parent
    /// handle for exclusive use. Checkouts wait until it is released.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the pool is closed.
    pub fn acquire_exclusive(&self) -> CoreResult<ExclusiveHandle> {
        let mut slots = self.shared.slots.lock();
        loop {
            if slots.closed {
                return Err(CoreError::invalid_state("pool is closed"));
            }
            if !slots.exclusive && slots.free.len() == self.capacity() {
                break;
            }
            self.shared.available.wait(&mut slots);
        }
        slots.exclusive = true;
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        drop(slots);

        let token = self.shared.parent.token()?;
        debug!(path = %self.path().display(), "checked out exclusive pool handle");
        Ok(ExclusiveHandle::new(
            Arc::clone(&self.shared),
            self.shared.view(token),
        ))
    }

    /// Returns `handle` to the pool. Returning a handle twice, or
    /// returning one already closed, does nothing, even once the pool
    /// itself is closed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` if `handle` came from another pool, or
    /// `InvalidState` if the pool is closed and the handle is still out.
    pub fn release(&self, handle: &PooledHandle) -> CoreResult<()> {
        if !handle.belongs_to(&self.shared) {
            return Err(CoreError::invalid_parameters(
                "handle was not checked out from this pool",
            ));
        }
        if !handle.is_checked_out() {
            return Ok(());
        }
        self.validate()?;
        handle.return_to_pool();
        Ok(())
    }

    /// Closes the pool and every handle it owns.
    ///
    /// # Errors
    ///
    /// Returns `PoolBusy` while any handle is checked out; nothing is
    /// released and the pool stays open. Returns `InvalidState` if already
    /// closed.
    pub fn close(&self) -> CoreResult<()> {
        let mut failure = None;
        self.shared
            .lifecycle
            .close_with(|| self.shared.teardown(&mut failure))?;
        failure.map_or(Ok(()), Err)
    }
}
