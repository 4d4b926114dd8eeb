//! Backfill / live-tail state machine that keeps the guess table in step
//! with the chain.
//!
//! The engine owns a cursor, the next slot without a persisted row. Each
//! step computes one contiguous batch starting at the cursor, upserts it and
//! only then moves the cursor, so the table never holds gaps below it.

use crate::beacon::source::{is_range_unavailable, ChainDataSource};
use crate::guess::batch::BatchSizer;
use crate::guess::classifier::ClassificationError;
use crate::guess::computer::BatchGuessComputer;
use crate::guess::record::Slot;
use crate::runtime::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_IDLE_INTERVAL, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY,
};
use crate::runtime::progress::SyncCheckpoint;
use crate::runtime::telemetry::Telemetry;
use crate::store::GuessStore;
use crate::sync::backoff::{
    is_cancelled, retry_fixed, Cancelled, RetryDisposition, RetryPolicy,
};
use crate::sync::pacing::{SlotPacer, DEFAULT_SLOT_DURATION};
use anyhow::{bail, Context, Error as AnyError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Backfilling,
    LiveTailing,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub batch_size: u64,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub slot_duration: Duration,
    pub idle_interval: Duration,
    /// First slot to classify when the table is empty.
    pub start_slot: Slot,
    /// Drop and recreate the table before syncing.
    pub reindex: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            slot_duration: DEFAULT_SLOT_DURATION,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            start_slot: 0,
            reindex: false,
        }
    }
}

/// What a single step of the state machine decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Advanced { rows: usize },
    Unavailable,
    Cancelled,
}

pub struct SyncEngine {
    source: Arc<dyn ChainDataSource>,
    computer: BatchGuessComputer,
    store: Arc<dyn GuessStore>,
    options: EngineOptions,
    batch: BatchSizer,
    pacer: SlotPacer,
    state: SyncState,
    cursor: Slot,
    checkpoint: Arc<SyncCheckpoint>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    initialized: bool,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ChainDataSource>,
        computer: BatchGuessComputer,
        store: Arc<dyn GuessStore>,
        options: EngineOptions,
        telemetry: Arc<Telemetry>,
        shutdown: CancellationToken,
    ) -> Self {
        let batch = BatchSizer::new(options.batch_size);
        let pacer = SlotPacer::new(options.slot_duration, options.idle_interval);
        let cursor = options.start_slot;
        Self {
            source,
            computer,
            store,
            options,
            batch,
            pacer,
            state: SyncState::Backfilling,
            cursor,
            checkpoint: Arc::new(SyncCheckpoint::default()),
            telemetry,
            shutdown,
            initialized: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Next slot that has no persisted row.
    pub fn cursor(&self) -> Slot {
        self.cursor
    }

    pub fn batch_size(&self) -> u64 {
        self.batch.get_size()
    }

    pub fn checkpoint(&self) -> Arc<SyncCheckpoint> {
        Arc::clone(&self.checkpoint)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ensures the table exists (recreating it when reindexing) and derives
    /// the cursor from the highest persisted slot.
    pub async fn initialize(&mut self) -> Result<()> {
        let replace = self.options.reindex;
        if replace {
            tracing::info!(
                start_slot = self.options.start_slot,
                "reindex requested; recreating guess table"
            );
        }

        let store = Arc::clone(&self.store);
        self.with_retry("create_table", || store.create_table(replace))
            .await
            .context("failed to prepare guess table")?;
        let last = self
            .with_retry("max_slot", || store.max_slot())
            .await
            .context("failed to read highest persisted slot")?;

        self.cursor = match last {
            Some(slot) => {
                let resume = slot.saturating_add(1);
                if resume != self.options.start_slot {
                    tracing::info!(
                        last_persisted_slot = slot,
                        start_slot = self.options.start_slot,
                        "resuming from persisted table instead of configured start slot"
                    );
                }
                resume
            }
            None => self.options.start_slot,
        };
        self.checkpoint.reset(last);
        self.state = SyncState::Backfilling;
        self.batch.reset();
        self.initialized = true;

        tracing::info!(cursor = self.cursor, "sync engine initialized");
        Ok(())
    }

    /// Syncs until the shutdown token fires or a fatal error occurs.
    pub async fn run(&mut self) -> Result<()> {
        if !self.initialized {
            match self.initialize().await {
                Err(err) if is_cancelled(&err) => return Ok(()),
                other => other?,
            }
        }

        loop {
            if self.step().await? == StepFlow::Stop {
                tracing::info!(cursor = self.cursor, "sync engine stopped");
                return Ok(());
            }
        }
    }

    /// Classifies and persists `start..=end`, then returns. Slots past the
    /// head are waited for rather than skipped.
    pub async fn run_range(&mut self, start: Slot, end: Slot) -> Result<()> {
        if start > end {
            bail!("invalid slot range {start}..={end}");
        }
        if !self.initialized {
            match self.initialize().await {
                Err(err) if is_cancelled(&err) => return Ok(()),
                other => other?,
            }
        }

        self.cursor = start;
        self.state = SyncState::Backfilling;
        while self.cursor <= end {
            if self.backfill_step(Some(end)).await? == StepFlow::Stop {
                return Ok(());
            }
        }

        tracing::info!(start_slot = start, end_slot = end, "bounded range synced");
        Ok(())
    }

    /// Runs one step of the state machine.
    pub async fn step(&mut self) -> Result<StepFlow> {
        if self.shutdown.is_cancelled() {
            return Ok(StepFlow::Stop);
        }

        match self.state {
            SyncState::Backfilling => self.backfill_step(None).await,
            SyncState::LiveTailing => self.live_tail_step().await,
        }
    }

    async fn backfill_step(&mut self, limit: Option<Slot>) -> Result<StepFlow> {
        let start = self.cursor;
        let mut end = start.saturating_add(self.batch.get_size() - 1);
        if let Some(limit) = limit {
            end = end.min(limit);
        }

        match self.process_range(start, end).await? {
            StepOutcome::Advanced { .. } => Ok(StepFlow::Continue),
            StepOutcome::Cancelled => Ok(StepFlow::Stop),
            StepOutcome::Unavailable => {
                tracing::info!(
                    start_slot = start,
                    end_slot = end,
                    batch_size = self.batch.get_size(),
                    "slot range not available yet"
                );

                if self.batch.shrink_on_failure() {
                    self.telemetry.record_range_halving();
                    return Ok(StepFlow::Continue);
                }

                if limit.is_some() {
                    return cancelled_to_stop(self.pacer.idle(&self.shutdown).await);
                }

                tracing::info!(
                    cursor = self.cursor,
                    "backfill reached the chain head; switching to live tail"
                );
                self.batch.reset();
                self.state = SyncState::LiveTailing;
                Ok(StepFlow::Continue)
            }
        }
    }

    async fn live_tail_step(&mut self) -> Result<StepFlow> {
        let source = Arc::clone(&self.source);
        let head = match self.with_retry("head_slot", || source.head_slot()).await {
            Ok(head) => head,
            Err(err) if is_cancelled(&err) => return Ok(StepFlow::Stop),
            Err(err) => {
                tracing::error!(error = %err, "could not query chain head");
                return Err(err.context("failed to query chain head"));
            }
        };

        if self.cursor > head {
            return cancelled_to_stop(self.pacer.idle(&self.shutdown).await);
        }

        let default_size = self.batch.default_size();
        let target = self.cursor.saturating_add(default_size - 1).min(head);
        let started = Instant::now();

        match self.process_range(self.cursor, target).await? {
            StepOutcome::Cancelled => Ok(StepFlow::Stop),
            StepOutcome::Unavailable => {
                tracing::info!(
                    start_slot = self.cursor,
                    end_slot = target,
                    head_slot = head,
                    "head slot not served yet"
                );
                cancelled_to_stop(self.pacer.idle(&self.shutdown).await)
            }
            StepOutcome::Advanced { .. } => {
                if head.saturating_sub(self.cursor) >= default_size {
                    tracing::info!(
                        cursor = self.cursor,
                        head_slot = head,
                        "fell behind the head by more than one batch; resuming backfill"
                    );
                    self.state = SyncState::Backfilling;
                    return Ok(StepFlow::Continue);
                }
                cancelled_to_stop(self.pacer.pace(started, &self.shutdown).await)
            }
        }
    }

    /// Computes and upserts `start..=end` under the retry budget, advancing
    /// the cursor only after the upsert commits.
    async fn process_range(&mut self, start: Slot, end: Slot) -> Result<StepOutcome> {
        let policy = RetryPolicy::fixed(self.options.retry_delay, self.options.max_retries)
            .with_cancellation(&self.shutdown);
        let telemetry = Arc::clone(&self.telemetry);
        let computer = &self.computer;
        let store = &self.store;
        let shutdown = &self.shutdown;

        let result = retry_fixed(
            policy,
            |_| async move {
                let rows = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Err(AnyError::new(Cancelled)),
                    rows = computer.compute(start, end) => rows?,
                };
                // Once started, the upsert runs to completion even on shutdown.
                store.upsert(&rows).await?;
                let placeholders = rows.iter().filter(|row| row.is_placeholder()).count();
                Ok::<_, AnyError>((rows.len(), placeholders))
            },
            |attempt, delay, err, will_retry| {
                if will_retry {
                    telemetry.record_retry();
                    tracing::warn!(
                        start_slot = start,
                        end_slot = end,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "batch failed; retrying"
                    );
                } else {
                    tracing::error!(
                        start_slot = start,
                        end_slot = end,
                        attempt,
                        error = %err,
                        "batch failed; retries exhausted"
                    );
                }
            },
            classify_batch_error,
        )
        .await;

        match result {
            Ok((rows, placeholders)) => {
                self.cursor = end.saturating_add(1);
                self.checkpoint.mark_persisted(end);
                self.telemetry
                    .record_batch(rows as u64, placeholders as u64);
                tracing::debug!(
                    start_slot = start,
                    end_slot = end,
                    rows,
                    placeholders,
                    "batch persisted"
                );
                Ok(StepOutcome::Advanced { rows })
            }
            Err(err) if is_cancelled(&err) => {
                tracing::info!(
                    start_slot = start,
                    end_slot = end,
                    "shutdown requested; dropping uncommitted batch"
                );
                Ok(StepOutcome::Cancelled)
            }
            Err(err) if is_range_unavailable(&err) => Ok(StepOutcome::Unavailable),
            Err(err) => {
                if let Some(classification) = find_classification_error(&err) {
                    if !classification.is_transient() {
                        tracing::error!(
                            slot = classification.slot(),
                            error = %err,
                            "block could not be classified"
                        );
                    }
                }
                Err(err.context(format!("failed to sync slots {start}..={end}")))
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let policy = RetryPolicy::fixed(self.options.retry_delay, self.options.max_retries)
            .with_cancellation(&self.shutdown);
        let telemetry = &self.telemetry;

        retry_fixed(
            policy,
            |_| call(),
            |attempt, delay, err, will_retry| {
                if will_retry {
                    telemetry.record_retry();
                    tracing::warn!(
                        operation,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "call failed; retrying"
                    );
                } else {
                    tracing::error!(operation, attempt, error = %err, "retries exhausted");
                }
            },
            |err| {
                if is_cancelled(err) {
                    RetryDisposition::Abort
                } else {
                    RetryDisposition::Retry
                }
            },
        )
        .await
    }
}

fn classify_batch_error(err: &AnyError) -> RetryDisposition {
    if is_cancelled(err) || is_range_unavailable(err) {
        return RetryDisposition::Abort;
    }
    match find_classification_error(err) {
        Some(classification) if !classification.is_transient() => RetryDisposition::Abort,
        _ => RetryDisposition::Retry,
    }
}

fn find_classification_error(err: &AnyError) -> Option<&ClassificationError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ClassificationError>())
}

fn cancelled_to_stop(result: Result<()>) -> Result<StepFlow> {
    match result {
        Ok(()) => Ok(StepFlow::Continue),
        Err(err) if is_cancelled(&err) => Ok(StepFlow::Stop),
        Err(err) => Err(err),
    }
}
