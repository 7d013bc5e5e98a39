//! Tokio-backed waiter

use async_trait::async_trait;
use megaphone_core::Waiter;
use std::time::Duration;

/// Waiter that suspends on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioWaiter;

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
