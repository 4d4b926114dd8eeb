//! Abstraction over whatever supplies block reward data for a slot range.

use crate::guess::record::{RewardRecord, Slot};
use anyhow::Result;
use futures::future::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Part of the requested range lies beyond the chain head.
    RangeUnavailable { start: Slot, end: Slot },
    Timeout { operation: &'static str },
    /// A single-slot lookup hit a slot without a block.
    EmptySlot { slot: Slot },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::RangeUnavailable { start, end } => {
                write!(f, "slot range {start}..={end} is not available yet")
            }
            ChainError::Timeout { operation } => write!(f, "beacon {operation} request timed out"),
            ChainError::EmptySlot { slot } => write!(f, "slot {slot} is empty"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Returns true when `err` (or anything in its chain) reports a range beyond the head.
pub fn is_range_unavailable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ChainError>(),
            Some(ChainError::RangeUnavailable { .. })
        )
    })
}

pub trait ChainDataSource: Send + Sync {
    /// Returns slot-ascending reward records for the occupied slots of
    /// `start..=end`. Empty slots are simply absent. Fails with
    /// [`ChainError::RangeUnavailable`] when `end` is beyond the head.
    fn fetch_rewards(&self, start: Slot, end: Slot) -> BoxFuture<'_, Result<Vec<RewardRecord>>>;

    fn head_slot(&self) -> BoxFuture<'_, Result<Slot>>;
}
