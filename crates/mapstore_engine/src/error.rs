//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a store engine.
///
/// These mirror the errno-style failures of a native key/value engine.
/// The handle layer maps them onto its own error kinds and attaches
/// the store path for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine has not been initialized.
    #[error("engine not initialized")]
    NotInitialized,

    /// The token does not name a live handle.
    #[error("bad resource token: {0}")]
    BadToken(u64),

    /// The requested entry, store or file does not exist.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// The target already exists.
    #[error("already exists: {0}")]
    Exists(String),

    /// An argument was rejected by the engine.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A write was attempted through a read-only handle.
    #[error("store opened read-only")]
    ReadOnly,

    /// A lock was released by a token that does not hold it.
    #[error("token {token} does not own the {kind} lock")]
    NotLockOwner {
        /// The releasing token.
        token: u64,
        /// The lock kind being released.
        kind: &'static str,
    },

    /// The file descriptor backing the handle was closed.
    #[error("file descriptor closed")]
    BadFileDescriptor,

    /// A size-limited store has no room left for the entry.
    #[error("page {page} is full and the store is limited to {max_pages} pages")]
    NoSpace {
        /// The page the entry hashes to.
        page: usize,
        /// The configured page limit.
        max_pages: usize,
    },

    /// The operation is not supported by this engine.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Returns true if a size limit rejected the write.
    pub fn is_no_space(&self) -> bool {
        matches!(self, Self::NoSpace { .. })
    }

    /// Returns true if this is the "no entry" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
