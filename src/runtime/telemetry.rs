use crate::runtime::progress::SyncCheckpoint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters for the sync loop.
#[derive(Default, Debug)]
pub struct Telemetry {
    persisted_slots: AtomicU64,
    placeholder_slots: AtomicU64,
    batches: AtomicU64,
    range_halvings: AtomicU64,
    retries: AtomicU64,
    fetch_timeouts: AtomicU64,
    feedback_added: AtomicU64,
    feedback_failures: AtomicU64,
}

impl Telemetry {
    pub fn record_batch(&self, slots: u64, placeholders: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.persisted_slots.fetch_add(slots, Ordering::Relaxed);
        self.placeholder_slots
            .fetch_add(placeholders, Ordering::Relaxed);
    }

    pub fn record_range_halving(&self) {
        self.range_halvings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_timeout(&self) {
        self.fetch_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feedback(&self, ok: bool) {
        if ok {
            self.feedback_added.fetch_add(1, Ordering::Relaxed);
        } else {
            self.feedback_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            persisted_slots: self.persisted_slots.load(Ordering::Relaxed),
            placeholder_slots: self.placeholder_slots.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            range_halvings: self.range_halvings.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fetch_timeouts: self.fetch_timeouts.load(Ordering::Relaxed),
            feedback_added: self.feedback_added.load(Ordering::Relaxed),
            feedback_failures: self.feedback_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub persisted_slots: u64,
    pub placeholder_slots: u64,
    pub batches: u64,
    pub range_halvings: u64,
    pub retries: u64,
    pub fetch_timeouts: u64,
    pub feedback_added: u64,
    pub feedback_failures: u64,
}

/// Spawns a background task that periodically logs throughput, the
/// checkpoint, and error counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    checkpoint: Arc<SyncCheckpoint>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "slotprint::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let persisted_delta = current
                        .persisted_slots
                        .saturating_sub(last_snapshot.persisted_slots);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        persisted_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "slotprint::metrics",
                        throughput = format!("{throughput:.2}"),
                        last_persisted_slot = checkpoint.last_persisted(),
                        persisted = current.persisted_slots,
                        placeholders = current.placeholder_slots,
                        batches = current.batches,
                        range_halvings = current.range_halvings,
                        retries = current.retries,
                        fetch_timeouts = current.fetch_timeouts,
                        feedback_failures = current.feedback_failures,
                        "sync metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
