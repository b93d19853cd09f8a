//! Open/closed state shared by every handle type.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;

/// Thread-safe open/closed state machine.
///
/// A lifecycle starts closed and is flipped open once its owner has
/// established its invariants. Closing is terminal: a closed lifecycle
/// never reopens. All transitions happen under one per-instance lock, so
/// two racing closers run the release hook at most once between them.
///
/// With `throw_on_invalid_access`, observing or closing an already closed
/// lifecycle is an `InvalidState` error; without it both are silent.
#[derive(Debug)]
pub struct Lifecycle {
    closed: Mutex<bool>,
    throw_on_invalid_access: bool,
}

impl Lifecycle {
    /// Creates a lifecycle in the closed state.
    #[must_use]
    pub fn new(throw_on_invalid_access: bool) -> Self {
        Self {
            closed: Mutex::new(true),
            throw_on_invalid_access,
        }
    }

    /// Creates a lifecycle that is already open.
    #[must_use]
    pub fn opened(throw_on_invalid_access: bool) -> Self {
        let lifecycle = Self::new(throw_on_invalid_access);
        lifecycle.set_open();
        lifecycle
    }

    /// Marks the lifecycle open. Only meaningful right after construction.
    pub(crate) fn set_open(&self) {
        *self.closed.lock() = false;
    }

    /// Returns true if invalid access is reported as an error.
    #[must_use]
    pub fn throws_on_invalid_access(&self) -> bool {
        self.throw_on_invalid_access
    }

    /// Returns whether the lifecycle is closed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if closed and configured to throw.
    pub fn is_closed(&self) -> CoreResult<bool> {
        let closed = *self.closed.lock();
        if closed && self.throw_on_invalid_access {
            return Err(CoreError::invalid_state("handle is closed"));
        }
        Ok(closed)
    }

    /// Returns the closed flag without any error reporting.
    #[must_use]
    pub fn peek_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Closes the lifecycle, running `release` if it is still open.
    ///
    /// `release` reports whether the resource is now fully closed; `false`
    /// keeps the lifecycle open. If `release` fails, the lifecycle stays
    /// open and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already closed and configured to throw,
    /// or whatever `release` returns.
    pub fn close_with(&self, release: impl FnOnce() -> CoreResult<bool>) -> CoreResult<()> {
        let mut closed = self.closed.lock();
        if *closed {
            if self.throw_on_invalid_access {
                return Err(CoreError::invalid_state("handle is already closed"));
            }
            return Ok(());
        }
        *closed = release()?;
        Ok(())
    }
}
