//! Turn-scoped cancellation.
//!
//! Each turn gets one `CancelToken`. The agent stores it under a mutex
//! while the turn runs; `cancel()` fires it. Every suspension point --
//! provider stream reads, store calls, tool runs, retry sleeps --
//! checks or awaits the same token.

use tokio_util::sync::CancellationToken;

/// A clonable cancellation token. Cancellation is one-shot: once
/// fired it stays fired.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Await cancellation (for racing against sleeps and I/O).
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}
