use std::{
    env,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use slotprint::{
    BatchGuessComputer, ComputerOptions, EngineOptions, GuessRow, Slot, SyncEngine, SyncState,
    Telemetry,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use super::memory_store::MemoryStore;
use super::scripted_chain::{expected_client, is_empty_slot, DeterministicClassifier, ScriptedChain};

pub static POSTGRES_GUARD: Lazy<tokio::sync::Mutex<()>> =
    Lazy::new(|| tokio::sync::Mutex::new(()));

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Connection string for the Postgres-backed tests, if they are enabled.
pub fn postgres_url() -> Option<String> {
    env::var("SLOTPRINT_PG_URL")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

pub fn assert_dense(rows: &[GuessRow], start: Slot, end: Slot) {
    let slots: Vec<Slot> = rows.iter().map(|row| row.slot).collect();
    let expected: Vec<Slot> = (start..=end).collect();
    assert_eq!(slots, expected, "rows must cover {start}..={end} without gaps");
}

/// Polls `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(5)).await;
    }
}

pub fn fast_options(start_slot: Slot, batch_size: u64) -> EngineOptions {
    EngineOptions {
        batch_size,
        max_retries: 3,
        retry_delay: Duration::from_millis(5),
        slot_duration: Duration::from_millis(20),
        idle_interval: Duration::from_millis(5),
        start_slot,
        reindex: false,
    }
}

pub fn computer_options(worker_count: usize) -> ComputerOptions {
    ComputerOptions {
        worker_count,
        min_sub_range: 8,
        fetch_timeout: Duration::from_secs(5),
    }
}

/// Engine over the scripted chain, a deterministic classifier and a memory store.
pub fn build_engine(
    chain: Arc<ScriptedChain>,
    classifier: Arc<DeterministicClassifier>,
    store: Arc<MemoryStore>,
    options: EngineOptions,
    worker_count: usize,
) -> (SyncEngine, Arc<Telemetry>) {
    let telemetry = Arc::new(Telemetry::default());
    let computer = BatchGuessComputer::new(
        chain.clone(),
        classifier,
        computer_options(worker_count),
        telemetry.clone(),
    );
    let engine = SyncEngine::new(
        chain,
        computer,
        store,
        options,
        telemetry.clone(),
        CancellationToken::new(),
    );
    (engine, telemetry)
}

/// Steps the engine until it leaves backfill, failing after `max_steps`.
pub async fn backfill_to_head(engine: &mut SyncEngine, max_steps: usize) -> Result<usize> {
    for step in 1..=max_steps {
        engine.step().await?;
        if engine.state() == SyncState::LiveTailing {
            return Ok(step);
        }
    }
    bail!("engine still backfilling after {max_steps} steps")
}

/// Checks that every non-empty slot carries the deterministic guess and
/// every empty slot is a placeholder.
pub fn assert_deterministic_rows(rows: &[GuessRow]) {
    for row in rows {
        if is_empty_slot(row.slot) {
            assert!(row.is_placeholder(), "slot {} should be a placeholder", row.slot);
            assert_eq!(row.proposer_index, None);
            continue;
        }
        let proposer_index = row.slot * 3 + 1;
        assert_eq!(row.proposer_index, Some(proposer_index));
        assert_eq!(
            row.best_guess_single(),
            expected_client(proposer_index).as_str(),
            "slot {} has an unexpected guess",
            row.slot
        );
    }
}
