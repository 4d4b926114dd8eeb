//! Turns a slot range into a dense, slot-ordered list of guess rows.

use crate::beacon::source::{ChainDataSource, ChainError};
use crate::guess::classifier::{ClassificationError, Classifier};
use crate::guess::feedback::{graffiti_client, TrainingFeedback};
use crate::guess::record::{RewardRecord, Slot};
use crate::guess::row::GuessRow;
use crate::runtime::config::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MIN_SUB_RANGE, DEFAULT_WORKER_COUNT};
use crate::runtime::telemetry::Telemetry;
use crate::sync::worker_pool::{partition_range, run_ordered, SlotRange};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct ComputerOptions {
    /// Upper bound on concurrent sub-range fetches per batch.
    pub worker_count: usize,
    /// Ranges shorter than this are never split further.
    pub min_sub_range: u64,
    pub fetch_timeout: Duration,
}

impl Default for ComputerOptions {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            min_sub_range: DEFAULT_MIN_SUB_RANGE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct BatchGuessComputer {
    source: Arc<dyn ChainDataSource>,
    classifier: Arc<dyn Classifier>,
    feedback: Option<Arc<dyn TrainingFeedback>>,
    options: ComputerOptions,
    telemetry: Arc<Telemetry>,
}

impl BatchGuessComputer {
    pub fn new(
        source: Arc<dyn ChainDataSource>,
        classifier: Arc<dyn Classifier>,
        options: ComputerOptions,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            source,
            classifier,
            feedback: None,
            options,
            telemetry,
        }
    }

    /// Enables feeding graffiti-labeled blocks back into the training set.
    pub fn with_feedback(mut self, feedback: Arc<dyn TrainingFeedback>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn options(&self) -> &ComputerOptions {
        &self.options
    }

    /// Classifies the block at `slot` on its own. An empty slot is an error
    /// here rather than a placeholder.
    pub async fn guess_slot(&self, slot: Slot) -> Result<GuessRow> {
        let row = self
            .compute(slot, slot)
            .await?
            .pop()
            .ok_or(ChainError::EmptySlot { slot })?;
        if row.is_placeholder() {
            return Err(ChainError::EmptySlot { slot }.into());
        }
        Ok(row)
    }

    /// Produces exactly one row per slot of `start..=end`, in slot order.
    ///
    /// Fails as a whole if any sub-range fetch or any classification fails;
    /// a range beyond the head surfaces as [`ChainError::RangeUnavailable`].
    pub async fn compute(&self, start: Slot, end: Slot) -> Result<Vec<GuessRow>> {
        if start > end {
            bail!("invalid slot range {start}..={end}");
        }

        let ranges = partition_range(
            start,
            end,
            self.options.worker_count,
            self.options.min_sub_range,
        );
        let parts = run_ordered(ranges, |range| {
            let worker = self.clone();
            async move { worker.compute_sub_range(range).await }
        })
        .await?;

        let mut rows = Vec::with_capacity(SlotRange::new(start, end).len() as usize);
        for part in parts {
            rows.extend(part);
        }
        Ok(rows)
    }

    async fn compute_sub_range(&self, range: SlotRange) -> Result<Vec<GuessRow>> {
        let records = match timeout(
            self.options.fetch_timeout,
            self.source.fetch_rewards(range.start, range.end),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                self.telemetry.record_fetch_timeout();
                return Err(ChainError::Timeout {
                    operation: "block_rewards",
                }
                .into());
            }
        };

        check_records(range, &records)?;

        let mut rows = Vec::with_capacity(range.len() as usize);
        let mut records = records.into_iter().peekable();
        for slot in range.start..=range.end {
            match records.next_if(|record| record.slot == slot) {
                Some(record) => rows.push(self.classify_record(record).await?),
                None => rows.push(GuessRow::placeholder(slot)),
            }
        }

        Ok(rows)
    }

    async fn classify_record(&self, record: RewardRecord) -> Result<GuessRow> {
        if let Some(feedback) = &self.feedback {
            if let Some(client) = record.graffiti.as_deref().and_then(graffiti_client) {
                match feedback.add_labeled(client, &record).await {
                    Ok(()) => self.telemetry.record_feedback(true),
                    Err(err) => {
                        self.telemetry.record_feedback(false);
                        tracing::warn!(
                            slot = record.slot,
                            client = %client,
                            error = %err,
                            "failed to add labeled block to training set"
                        );
                    }
                }
            }
        }

        match self.classifier.classify(&record).await {
            Ok(guess) => Ok(GuessRow::classified(&record, guess)),
            Err(err) if err.is::<ClassificationError>() => Err(err),
            Err(err) => Err(ClassificationError::permanent(record.slot, err).into()),
        }
    }
}

/// Records must be strictly ascending and inside the requested range.
fn check_records(range: SlotRange, records: &[RewardRecord]) -> Result<()> {
    let mut previous: Option<Slot> = None;
    for record in records {
        if record.slot < range.start || record.slot > range.end {
            bail!(
                "chain data source returned slot {} outside requested range {range}",
                record.slot
            );
        }
        if previous.is_some_and(|prev| record.slot <= prev) {
            bail!(
                "chain data source returned slot {} out of order in range {range}",
                record.slot
            );
        }
        previous = Some(record.slot);
    }
    Ok(())
}
