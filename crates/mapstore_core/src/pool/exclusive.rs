use super::PoolShared;
use crate::error::{CoreError, CoreResult};
use crate::store::{MapStore, Session, StoreView};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sole use of a pool's parent handle, from
/// [`super::HandlePool::acquire_exclusive`].
///
/// While it is out no pooled handle can be checked out. Closing or
/// dropping it re-admits checkouts.
#[derive(Debug)]
pub struct ExclusiveHandle {
    pool: Arc<PoolShared>,
    view: StoreView,
    active: AtomicBool,
}

impl ExclusiveHandle {
    pub(super) fn new(pool: Arc<PoolShared>, view: StoreView) -> Self {
        Self {
            pool,
            view,
            active: AtomicBool::new(true),
        }
    }

    fn finish(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.pool.end_exclusive();
        }
    }
}

impl MapStore for ExclusiveHandle {
    fn with_session<R>(&self, f: impl FnOnce(&Session<'_>) -> CoreResult<R>) -> CoreResult<R> {
        if !self.active.load(Ordering::Acquire) {
            return Err(CoreError::invalid_state("exclusive handle was released"));
        }
        self.view.with_session(f)
    }

    fn path(&self) -> &Path {
        self.view.path()
    }

    fn is_closed(&self) -> CoreResult<bool> {
        Ok(!self.active.load(Ordering::Acquire))
    }

    fn close(&self) -> CoreResult<()> {
        self.finish();
        Ok(())
    }

    fn close_fd(&self) -> CoreResult<()> {
        Err(CoreError::UncloseableViolation {
            what: "exclusive handle file descriptor",
        })
    }
}

impl Drop for ExclusiveHandle {
    fn drop(&mut self) {
        self.finish();
    }
}
