//! Mutex-serialized store wrapper.

use crate::error::CoreResult;
use crate::lifecycle::Lifecycle;
use crate::store::{MapStore, Session};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Serializes every operation on a wrapped store through one mutex.
///
/// Each [`MapStore`] call holds the mutex for its full duration, so a
/// single handle can be shared (for example in an `Arc`) by many threads.
/// Closing the wrapper closes the wrapped store; a second close is
/// `InvalidState`.
#[derive(Debug)]
pub struct SynchronizedStore<S> {
    inner: Mutex<S>,
    path: PathBuf,
    lifecycle: Lifecycle,
}

impl<S: MapStore> SynchronizedStore<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        let path = store.path().to_path_buf();
        Self {
            inner: Mutex::new(store),
            path,
            lifecycle: Lifecycle::opened(true),
        }
    }

    /// Unwraps the store.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl<S: MapStore> MapStore for SynchronizedStore<S> {
    fn with_session<R>(&self, f: impl FnOnce(&Session<'_>) -> CoreResult<R>) -> CoreResult<R> {
        self.lifecycle.is_closed()?;
        self.inner.lock().with_session(f)
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_closed(&self) -> CoreResult<bool> {
        self.lifecycle.is_closed()
    }

    fn close(&self) -> CoreResult<()> {
        self.lifecycle.close_with(|| {
            self.inner.lock().close()?;
            Ok(true)
        })
    }

    fn close_fd(&self) -> CoreResult<()> {
        self.inner.lock().close_fd()
    }
}

#[cfg(test)]
mod tests {
    use crate::{MapStore, OpenOptions, Runtime};
    use mapstore_engine::{InMemoryEngine, StoreMode};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn shared_across_threads() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let store = Arc::new(
            runtime
                .open_synchronized("/sync", &OpenOptions::new())
                .unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..50 {
                        let key = format!("{t}-{i}");
                        store.store_str(&key, &key, StoreMode::Insert).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.entries().unwrap().count(), 200);
        assert_eq!(store.fetch_str("3-49").unwrap(), "3-49");
        store.close().unwrap();
    }

    #[test]
    fn second_close_is_invalid_state() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let store = runtime
            .open_synchronized("/sync-twice", &OpenOptions::new())
            .unwrap();
        store.close().unwrap();
        assert!(store.close().unwrap_err().is_invalid_state());
        assert!(store.is_closed().unwrap_err().is_invalid_state());
        assert!(store.fetch(b"k").unwrap_err().is_invalid_state());
    }

    #[test]
    fn lock_is_held_across_calls_by_wrapped_token() {
        let runtime = Runtime::new(InMemoryEngine::new()).unwrap();
        let store = runtime
            .open_synchronized("/sync-lock", &OpenOptions::new())
            .unwrap();
        store.lock().unwrap();
        assert!(store.is_owned().unwrap());
        store.unlock().unwrap();

        let inner = store.into_inner();
        assert!(!inner.is_locked().unwrap());
        inner.close().unwrap();
    }
}
