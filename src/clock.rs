//! Time source used for pacing, settle pauses and timestamps

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic instant for measuring elapsed cycle time
    fn now(&self) -> Instant;

    /// Wall-clock time for reporting
    fn wall(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by tokio's timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
pub use manual::ManualClock;
