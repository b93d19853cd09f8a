//! # mapstore engine
//!
//! The contract between mapstore and the key/value store engine it wraps,
//! plus an in-memory reference engine.
//!
//! The engine is a handle-based, memory-mapped style store: callers open a
//! store and receive an opaque [`ResourceToken`], then pass that token to
//! every data, lock and maintenance call. Tokens are not reentrant and are
//! released manually; the safety layer built on top lives in
//! `mapstore_core`.
//!
//! ## Design Principles
//!
//! - The engine never interprets keys or values
//! - Every failure is a typed [`EngineError`], never a sentinel value
//! - Locks belong to tokens and nest per owner
//! - Implementations must be `Send + Sync`
//!
//! ## Available Engines
//!
//! - [`InMemoryEngine`] - Thread-safe in-memory engine for tests and
//!   ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use mapstore_engine::{HashFunction, InMemoryEngine, StoreEngine};
//!
//! let engine = InMemoryEngine::new();
//! engine.initialize().unwrap();
//! let value = engine.hash_value(b"key", HashFunction::Fnv).unwrap();
//! assert_eq!(value, HashFunction::Fnv.hash(b"key").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod hash;
mod memory;
mod types;

pub use engine::StoreEngine;
pub use error::{EngineError, EngineResult};
pub use hash::HashFunction;
pub use memory::{InMemoryEngine, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use types::{
    Geometry, IterState, LockKind, LockWait, OpenFlags, PruneDecision, ResourceToken, ShakeFn,
    StoreFlags, StoreMode, StoreOutcome,
};
