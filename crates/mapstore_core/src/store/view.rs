//! Non-owning store view.

use crate::error::{CoreError, CoreResult};
use crate::store::{Binding, MapStore, Session};
use mapstore_engine::ResourceToken;
use std::cell::Cell;
use std::marker::PhantomData;
use std::path::Path;

/// A handle over a token owned by someone else.
///
/// A view has no release path: `close` and `close_fd` are
/// `UncloseableViolation`. The owner guarantees the token outlives every
/// view it hands out.
#[derive(Debug)]
pub(crate) struct StoreView {
    binding: Binding,
    token: ResourceToken,
    _not_sync: PhantomData<Cell<()>>,
}

impl StoreView {
    pub fn new(binding: Binding, token: ResourceToken) -> Self {
        Self {
            binding,
            token,
            _not_sync: PhantomData,
        }
    }
}

impl MapStore for StoreView {
    fn with_session<R>(&self, f: impl FnOnce(&Session<'_>) -> CoreResult<R>) -> CoreResult<R> {
        if self.token.is_none() {
            return Err(CoreError::invalid_state("view has no live resource"));
        }
        f(&Session::new(&self.binding, self.token))
    }

    fn path(&self) -> &Path {
        self.binding.path()
    }

    fn is_closed(&self) -> CoreResult<bool> {
        Ok(self.token.is_none())
    }

    fn close(&self) -> CoreResult<()> {
        Err(CoreError::UncloseableViolation { what: "store view" })
    }

    fn close_fd(&self) -> CoreResult<()> {
        Err(CoreError::UncloseableViolation {
            what: "store view file descriptor",
        })
    }
}
