//! Clock and wait capabilities
//!
//! The processor never reads the wall clock or sleeps directly; both are
//! injected so tests can simulate lock staleness and run with zero delay.

use crate::Timestamp;
use async_trait::async_trait;
use std::time::Duration;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}

/// Capability to wait between sends (humanized delay).
#[async_trait]
pub trait Waiter: Send + Sync {
    /// Suspend for the given duration.
    async fn wait(&self, duration: Duration);
}

/// A waiter that returns immediately. Used in tests and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWait;

#[async_trait]
impl Waiter for NoWait {
    async fn wait(&self, _duration: Duration) {}
}
