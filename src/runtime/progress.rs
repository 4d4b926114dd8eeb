use crate::guess::record::Slot;
use std::sync::atomic::{AtomicU64, Ordering};

// Stored as `last persisted slot + 1`, so zero means nothing persisted yet.
const NOTHING_PERSISTED: u64 = 0;

/// In-memory mirror of the store's highest persisted slot.
///
/// Only moves forward; [`SyncCheckpoint::reset`] is the single way back and is
/// reserved for reindexing.
#[derive(Debug, Default)]
pub struct SyncCheckpoint {
    next_slot: AtomicU64,
}

impl SyncCheckpoint {
    pub fn new(last_persisted: Option<Slot>) -> Self {
        Self {
            next_slot: AtomicU64::new(Self::encode(last_persisted)),
        }
    }

    pub fn reset(&self, last_persisted: Option<Slot>) {
        self.next_slot
            .store(Self::encode(last_persisted), Ordering::SeqCst);
    }

    pub fn mark_persisted(&self, slot: Slot) {
        self.next_slot
            .fetch_max(slot.saturating_add(1), Ordering::SeqCst);
    }

    pub fn last_persisted(&self) -> Option<Slot> {
        match self.next_slot.load(Ordering::SeqCst) {
            NOTHING_PERSISTED => None,
            value => Some(value - 1),
        }
    }

    fn encode(last_persisted: Option<Slot>) -> u64 {
        last_persisted
            .map(|slot| slot.saturating_add(1))
            .unwrap_or(NOTHING_PERSISTED)
    }
}
