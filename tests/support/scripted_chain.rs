use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use slotprint::{
    ChainDataSource, ChainError, ClassificationError, Classifier, ConsensusClient, Guess,
    ProbabilityMap, RewardRecord, Slot,
};
use tokio::time::sleep;

/// Slots divisible by this have no block.
pub const EMPTY_SLOT_MODULUS: u64 = 5;

pub fn is_empty_slot(slot: Slot) -> bool {
    slot % EMPTY_SLOT_MODULUS == 0
}

/// Reward entry shaped like the Lighthouse analysis endpoint output.
pub fn reward_payload(slot: Slot) -> Value {
    let graffiti = if slot % 7 == 0 {
        format!("Lighthouse/v5.1.{slot}")
    } else {
        String::new()
    };
    json!({
        "block_root": format!("0x{slot:064x}"),
        "meta": {
            "slot": slot.to_string(),
            "parent_slot": slot.saturating_sub(1).to_string(),
            "proposer_index": (slot * 3 + 1).to_string(),
            "graffiti": graffiti,
        },
        "attestation_rewards": { "total": 1_000 + slot },
        "sync_committee_rewards": 0,
    })
}

/// Client the deterministic classifiers assign to a proposer.
pub fn expected_client(proposer_index: u64) -> ConsensusClient {
    ConsensusClient::ALL[(proposer_index % ConsensusClient::COUNT as u64) as usize]
}

/// Chain source driven by the test: a movable head, every fifth slot empty,
/// and injectable failures and latency.
pub struct ScriptedChain {
    head: AtomicU64,
    failing_fetches: AtomicUsize,
    fetch_delay_ms: AtomicU64,
    head_queries: AtomicUsize,
    fetches: Mutex<Vec<(Slot, Slot)>>,
}

impl ScriptedChain {
    pub fn new(head: Slot) -> Self {
        Self {
            head: AtomicU64::new(head),
            failing_fetches: AtomicUsize::new(0),
            fetch_delay_ms: AtomicU64::new(0),
            head_queries: AtomicUsize::new(0),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, head: Slot) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn head(&self) -> Slot {
        self.head.load(Ordering::SeqCst)
    }

    /// Makes the next `count` fetches fail with a transport-style error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> Vec<(Slot, Slot)> {
        self.fetches.lock().expect("fetch log poisoned").clone()
    }

    pub fn head_queries(&self) -> usize {
        self.head_queries.load(Ordering::SeqCst)
    }

    async fn rewards(&self, start: Slot, end: Slot) -> Result<Vec<RewardRecord>> {
        self.fetches
            .lock()
            .expect("fetch log poisoned")
            .push((start, end));

        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }

        let pending_failures = self.failing_fetches.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_fetches
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(anyhow!("connection refused"));
        }

        if end > self.head() {
            return Err(ChainError::RangeUnavailable { start, end }.into());
        }

        (start..=end)
            .filter(|slot| !is_empty_slot(*slot))
            .map(|slot| RewardRecord::from_value(reward_payload(slot)))
            .collect()
    }
}

impl ChainDataSource for ScriptedChain {
    fn fetch_rewards(&self, start: Slot, end: Slot) -> BoxFuture<'_, Result<Vec<RewardRecord>>> {
        Box::pin(self.rewards(start, end))
    }

    fn head_slot(&self) -> BoxFuture<'_, Result<Slot>> {
        Box::pin(async move {
            self.head_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.head())
        })
    }
}

/// Classifier whose answer depends only on the proposer index.
#[derive(Default)]
pub struct DeterministicClassifier {
    reject_slot: Option<Slot>,
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl DeterministicClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every classification of `slot` fails permanently.
    pub fn rejecting(slot: Slot) -> Self {
        Self {
            reject_slot: Some(slot),
            ..Self::default()
        }
    }

    pub fn fail_next_transiently(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn deterministic_guess(proposer_index: u64) -> Result<Guess> {
    let client = expected_client(proposer_index);
    let runner_up = expected_client(proposer_index + 1);
    let probability_map =
        ProbabilityMap::from_pairs([(client.as_str(), 0.75), (runner_up.as_str(), 0.25)])?;
    Ok(Guess {
        best_guess_single: client,
        best_guess_multi: format!("{client} or {runner_up}"),
        probability_map,
    })
}

impl Classifier for DeterministicClassifier {
    fn classify<'a>(&'a self, record: &'a RewardRecord) -> BoxFuture<'a, Result<Guess>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.reject_slot == Some(record.slot) {
                return Err(ClassificationError::permanent(
                    record.slot,
                    anyhow!("unsupported reward layout"),
                )
                .into());
            }

            let pending = self.transient_failures.load(Ordering::SeqCst);
            if pending > 0 {
                self.transient_failures.store(pending - 1, Ordering::SeqCst);
                return Err(ClassificationError::transient(
                    record.slot,
                    anyhow!("classifier overloaded"),
                )
                .into());
            }

            deterministic_guess(record.proposer_index)
        })
    }
}
