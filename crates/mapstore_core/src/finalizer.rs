//! Owning token holder with a drop-time safety net.

use crate::error::{CoreError, CoreResult};
use crate::lifecycle::Lifecycle;
use crate::stats::HandleStats;
use mapstore_engine::ResourceToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Releases an engine token.
pub type ReleaseFn = Arc<dyn Fn(ResourceToken) -> CoreResult<()> + Send + Sync>;

/// Exclusive owner of one engine token.
///
/// The token is released exactly once: by [`close`](Self::close), or, if
/// the owner never closed it, when the holder is dropped. A drop-time
/// release is a leak being cleaned up; it is logged at `warn` and counted
/// in [`HandleStats::finalizer_reclaims`]. Its failure cannot reach the
/// caller and is only logged and counted.
pub struct FinalizingHandle {
    lifecycle: Lifecycle,
    token: AtomicU64,
    release: ReleaseFn,
    label: String,
    stats: Arc<HandleStats>,
}

impl FinalizingHandle {
    /// Takes ownership of `token`.
    ///
    /// `label` names the resource in log events.
    pub fn new(
        token: ResourceToken,
        release: ReleaseFn,
        label: impl Into<String>,
        stats: Arc<HandleStats>,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::opened(true),
            token: AtomicU64::new(token.as_raw()),
            release,
            label: label.into(),
            stats,
        }
    }

    /// Returns the label used in log events.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the live token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if closed or the token is zero.
    pub fn token(&self) -> CoreResult<ResourceToken> {
        if self.lifecycle.is_closed()? {
            return Err(CoreError::invalid_state("handle is closed"));
        }
        let token = ResourceToken::from_raw(self.token.load(Ordering::Acquire));
        if token.is_none() {
            return Err(CoreError::invalid_state(format!(
                "{} has no live resource",
                self.label
            )));
        }
        Ok(token)
    }

    /// Returns whether the handle is closed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if it is.
    pub fn is_closed(&self) -> CoreResult<bool> {
        self.lifecycle.is_closed()
    }

    /// Releases the token and disarms the drop-time release.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already closed, or the release failure.
    /// A failed release leaves the handle open and still armed.
    pub fn close(&self) -> CoreResult<()> {
        self.lifecycle.close_with(|| {
            let raw = self.token.load(Ordering::Acquire);
            if raw != 0 {
                (self.release)(ResourceToken::from_raw(raw))?;
                self.token.store(0, Ordering::Release);
                self.stats.record_close();
                debug!(token = raw, label = %self.label, "released handle");
            }
            Ok(true)
        })
    }
}

impl std::fmt::Debug for FinalizingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizingHandle")
            .field("token", &ResourceToken::from_raw(self.token.load(Ordering::Relaxed)))
            .field("label", &self.label)
            .field("closed", &self.lifecycle.peek_closed())
            .finish()
    }
}

impl Drop for FinalizingHandle {
    fn drop(&mut self) {
        let raw = std::mem::take(self.token.get_mut());
        if raw == 0 {
            return;
        }
        let token = ResourceToken::from_raw(raw);
        warn!(%token, label = %self.label, "handle dropped without close; releasing");
        self.stats.record_finalizer_reclaim();
        if let Err(err) = (self.release)(token) {
            error!(%token, label = %self.label, error = %err, "release on drop failed");
            self.stats.record_finalizer_failure();
        }
    }
}
