//! # mapstore core
//!
//! Safe, lifecycle-managed handles over a [`mapstore_engine::StoreEngine`].
//!
//! The engine hands out raw tokens that must be released exactly once and
//! must not be used after release or from two threads at once. This crate
//! wraps them:
//!
//! - [`StoreHandle`] owns a token and releases it on `close` or, as a
//!   logged last resort, on drop
//! - [`HandlePool`] hands out duplicated handles to concurrent callers and
//!   refuses to tear down while any are checked out
//! - [`SynchronizedStore`] serializes one handle behind a mutex
//! - [`MapStore`] is the operation set every handle type shares
//!
//! ## Design Principles
//!
//! - Validate before every engine call; a closed handle is `InvalidState`
//! - Owning and non-owning handles are different types, so a view can
//!   never release a token
//! - Every engine failure becomes a typed [`CoreError`] carrying the path
//! - Nothing initializes itself implicitly; see [`Runtime`]
//!
//! ## Example
//!
//! ```rust
//! use mapstore_core::{MapStore, OpenOptions, Runtime};
//! use mapstore_engine::{InMemoryEngine, StoreMode};
//!
//! let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
//! let store = runtime.open("/example", &OpenOptions::new()).unwrap();
//!
//! store.store(b"name", b"mapstore", StoreMode::Insert).unwrap();
//! assert_eq!(store.fetch(b"name").unwrap(), b"mapstore");
//!
//! {
//!     let _lock = store.lock_guard().unwrap();
//!     store.delete(b"name").unwrap();
//! }
//! assert!(store.fetch(b"name").unwrap_err().is_no_entry());
//!
//! store.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod finalizer;
mod guard;
mod lifecycle;
mod pool;
mod runtime;
mod stats;
mod store;
mod sync;

pub use config::OpenOptions;
pub use error::{CoreError, CoreResult};
pub use finalizer::{FinalizingHandle, ReleaseFn};
pub use guard::{PageLock, SharedLock, SmartLock, StoreLock};
pub use lifecycle::Lifecycle;
pub use pool::{ExclusiveHandle, HandlePool, PooledHandle};
pub use runtime::Runtime;
pub use stats::{HandleStats, StatsSnapshot};
pub use store::{Cursor, Entries, LockProbe, MapStore, Session, StoreHandle};
pub use sync::SynchronizedStore;

pub use mapstore_engine::{
    HashFunction, OpenFlags, PruneDecision, ShakeFn, StoreFlags, StoreMode,
};
