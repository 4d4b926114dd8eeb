//! Keeps live-tail polling in step with the chain's slot cadence.

use super::backoff::sleep_with_cancellation;
use anyhow::Result;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One slot on mainnet.
pub const DEFAULT_SLOT_DURATION: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Copy)]
pub struct SlotPacer {
    slot_duration: Duration,
    idle_interval: Duration,
}

impl SlotPacer {
    pub fn new(slot_duration: Duration, idle_interval: Duration) -> Self {
        Self {
            slot_duration,
            idle_interval,
        }
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    /// Remaining part of the slot after `elapsed` of work, never negative.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.slot_duration.saturating_sub(elapsed)
    }

    /// Sleeps out the rest of the slot that started at `started`.
    pub(crate) async fn pace(&self, started: Instant, shutdown: &CancellationToken) -> Result<()> {
        let remaining = self.remaining(started.elapsed());
        tracing::trace!(
            sleep_ms = remaining.as_millis() as u64,
            "pacing live tail to slot cadence"
        );
        sleep_with_cancellation(remaining, Some(shutdown)).await
    }

    pub(crate) async fn idle(&self, shutdown: &CancellationToken) -> Result<()> {
        sleep_with_cancellation(self.idle_interval, Some(shutdown)).await
    }
}
