//! Injectable delays for reconnect scheduling.

use std::time::Duration;

use async_trait::async_trait;

/// Source of reconnect delays.
///
/// Production uses [`TokioTimer`]; tests substitute timers that record the
/// requested delays and return immediately.
#[async_trait]
pub trait Timer: Send + Sync + 'static {
    /// Wait for `delay`. Must be cancel-safe: the driver drops the future
    /// when the client closes.
    async fn sleep(&self, delay: Duration);
}

/// Timer backed by the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
