use super::PoolShared;
use crate::error::{CoreError, CoreResult};
use crate::store::{MapStore, Session, StoreView};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A handle checked out of a [`super::HandlePool`].
///
/// Closing or dropping it returns it to the pool; it never releases the
/// engine token. Once returned, every operation fails with
/// `InvalidState`, and closing again does nothing.
#[derive(Debug)]
pub struct PooledHandle {
    pool: Arc<PoolShared>,
    slot: usize,
    view: StoreView,
    checked_out: AtomicBool,
}

impl PooledHandle {
    pub(super) fn new(pool: Arc<PoolShared>, slot: usize, view: StoreView) -> Self {
        Self {
            pool,
            slot,
            view,
            checked_out: AtomicBool::new(true),
        }
    }

    /// Returns the pool slot this handle occupies.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub(super) fn belongs_to(&self, pool: &Arc<PoolShared>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    pub(super) fn is_checked_out(&self) -> bool {
        self.checked_out.load(Ordering::Acquire)
    }

    pub(super) fn return_to_pool(&self) {
        if self.checked_out.swap(false, Ordering::AcqRel) {
            self.pool.give_back(self.slot);
        }
    }
}

impl MapStore for PooledHandle {
    fn with_session<R>(&self, f: impl FnOnce(&Session<'_>) -> CoreResult<R>) -> CoreResult<R> {
        if !self.checked_out.load(Ordering::Acquire) {
            return Err(CoreError::invalid_state("pooled handle was returned"));
        }
        self.view.with_session(f)
    }

    fn path(&self) -> &Path {
        self.view.path()
    }

    fn is_closed(&self) -> CoreResult<bool> {
        Ok(!self.checked_out.load(Ordering::Acquire))
    }

    fn close(&self) -> CoreResult<()> {
        self.return_to_pool();
        Ok(())
    }

    fn close_fd(&self) -> CoreResult<()> {
        Err(CoreError::UncloseableViolation {
            what: "pooled handle file descriptor",
        })
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}
