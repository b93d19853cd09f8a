//! Error types for mapstore core.

use mapstore_engine::EngineError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in mapstore core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Operation on a closed, never-opened or zero-token handle.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated state.
        message: String,
    },

    /// Shared lock requested on a handle opened without shared locking.
    #[error("shared locks are not enabled for {}", .path.display())]
    SharedLockViolation {
        /// Store path.
        path: PathBuf,
    },

    /// Fetch or delete found nothing.
    #[error("{operation}: no entry in {}", .path.display())]
    NoEntry {
        /// Store path.
        path: PathBuf,
        /// The operation that found nothing.
        operation: &'static str,
    },

    /// A lock could not be acquired.
    #[error("lock failed on {}: {message}", .path.display())]
    LockFailed {
        /// Store path.
        path: PathBuf,
        /// Why the lock was not taken.
        message: String,
    },

    /// A lock could not be released.
    #[error("unlock failed on {}: {message}", .path.display())]
    UnlockFailed {
        /// Store path.
        path: PathBuf,
        /// Why the lock was not released.
        message: String,
    },

    /// A handle pool could not be created.
    #[error("cannot create pool: {message}")]
    CreatePool {
        /// Description of the failure.
        message: String,
    },

    /// Pool teardown refused while handles are checked out.
    #[error("pool has {outstanding} of {capacity} handles checked out")]
    PoolBusy {
        /// Handles still checked out.
        outstanding: usize,
        /// Pool capacity.
        capacity: usize,
    },

    /// Delete failed for a reason other than a missing entry.
    #[error("delete failed on {}: {source}", .path.display())]
    Delete {
        /// Store path.
        path: PathBuf,
        /// Engine failure.
        source: EngineError,
    },

    /// Fetch failed for a reason other than a missing entry.
    #[error("fetch failed on {}: {source}", .path.display())]
    Fetch {
        /// Store path.
        path: PathBuf,
        /// Engine failure.
        source: EngineError,
    },

    /// Store failed.
    #[error("store failed on {}: {source}", .path.display())]
    Store {
        /// Store path.
        path: PathBuf,
        /// Engine failure.
        source: EngineError,
    },

    /// Opening a store failed.
    #[error("open failed for {} ({info}): {source}", .path.display())]
    Open {
        /// Store path.
        path: PathBuf,
        /// Open parameters.
        info: String,
        /// Engine failure.
        source: EngineError,
    },

    /// Attempt to close through a view that does not own the resource.
    #[error("{what} cannot be closed through this handle")]
    UncloseableViolation {
        /// What the caller tried to close.
        what: &'static str,
    },

    /// Unknown hash function code.
    #[error("unknown hash function code: {code}")]
    UnknownHashFunction {
        /// The rejected code.
        code: i32,
    },

    /// Rejected caller-supplied parameters.
    #[error("invalid parameters: {message}")]
    InvalidParameters {
        /// Description of the problem.
        message: String,
    },

    /// Any other engine failure.
    #[error("{operation} failed on {}: {source}", .path.display())]
    Engine {
        /// Store path.
        path: PathBuf,
        /// The failing operation.
        operation: &'static str,
        /// Engine failure.
        source: EngineError,
    },
}

impl CoreError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a create-pool error.
    pub fn create_pool(message: impl Into<String>) -> Self {
        Self::CreatePool {
            message: message.into(),
        }
    }

    /// Creates an invalid parameters error.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Returns true for invalid-state errors, including shared lock
    /// violations.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. } | Self::SharedLockViolation { .. }
        )
    }

    /// Returns true if a fetch or delete found nothing.
    pub fn is_no_entry(&self) -> bool {
        matches!(self, Self::NoEntry { .. })
    }
}
