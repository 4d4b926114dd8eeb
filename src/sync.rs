//! Sync loop: the engine state machine plus the retry, pacing and fan-out
//! helpers it drives.

pub mod backoff;
pub mod engine;
pub mod pacing;
pub mod worker_pool;

pub use backoff::{is_cancelled, Cancelled};
pub use engine::{EngineOptions, StepFlow, SyncEngine, SyncState};
pub use pacing::{SlotPacer, DEFAULT_SLOT_DURATION};
pub use worker_pool::{partition_range, SlotRange};
