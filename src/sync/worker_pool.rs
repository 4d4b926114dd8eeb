//! Bounded fan-out of one batch over contiguous sub-ranges.
//!
//! Each sub-range becomes one task; results are collected by index so the
//! caller can concatenate them in slot order no matter which task finishes
//! first. The first failure aborts the remaining tasks.

use crate::guess::record::Slot;
use anyhow::{anyhow, Result};
use std::any::Any;
use std::future::Future;
use tokio::task::JoinSet;

/// Inclusive slot range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: Slot,
    pub end: Slot,
}

impl SlotRange {
    pub fn new(start: Slot, end: Slot) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Splits `start..=end` into at most `max_workers` contiguous pieces of at
/// least `min_len` slots each. A range shorter than `min_len` stays whole.
/// Leftover slots go to the leading pieces.
pub fn partition_range(start: Slot, end: Slot, max_workers: usize, min_len: u64) -> Vec<SlotRange> {
    if end < start {
        return Vec::new();
    }

    let total = SlotRange::new(start, end).len();
    let min_len = min_len.max(1);
    let by_length = (total / min_len).max(1);
    let parts = by_length.min(max_workers.max(1) as u64);

    let base = total / parts;
    let remainder = total % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut cursor = start;
    for index in 0..parts {
        let len = base + u64::from(index < remainder);
        let range_end = cursor + len - 1;
        ranges.push(SlotRange::new(cursor, range_end));
        cursor = range_end.saturating_add(1);
    }
    ranges
}

/// Runs `task` for every range concurrently and returns the outputs in range order.
pub(crate) async fn run_ordered<T, F, Fut>(ranges: Vec<SlotRange>, task: F) -> Result<Vec<T>>
where
    F: Fn(SlotRange) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if ranges.len() <= 1 {
        let mut outputs = Vec::with_capacity(ranges.len());
        for range in ranges {
            outputs.push(task(range).await?);
        }
        return Ok(outputs);
    }

    let total = ranges.len();
    let mut set = JoinSet::new();
    for (index, range) in ranges.into_iter().enumerate() {
        let future = task(range);
        set.spawn(async move { (index, range, future.await) });
    }

    let mut outputs: Vec<Option<T>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, _, Ok(value))) => outputs[index] = Some(value),
            Ok((index, range, Err(err))) => {
                set.abort_all();
                tracing::debug!(
                    worker = index,
                    start_slot = range.start,
                    end_slot = range.end,
                    error = %err,
                    "batch worker failed; aborting siblings"
                );
                return Err(err.context(format!("batch worker {index} failed on slots {range}")));
            }
            Err(join_err) => {
                set.abort_all();
                if join_err.is_panic() {
                    let panic_msg = panic_message(join_err.into_panic().as_ref());
                    tracing::error!(panic = %panic_msg, "batch worker panicked");
                    return Err(anyhow!("batch worker panicked: {panic_msg}"));
                }
                return Err(anyhow!("batch worker was cancelled: {join_err}"));
            }
        }
    }

    outputs
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow!("batch worker finished without a result"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
