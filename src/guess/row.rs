use super::client::{ConsensusClient, ProbabilityMap};
use super::record::{RewardRecord, Slot};

/// Classifier output for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Guess {
    pub best_guess_single: ConsensusClient,
    /// Multi-label guess such as `"Lighthouse or Teku"`, as produced by the model.
    pub best_guess_multi: String,
    pub probability_map: ProbabilityMap,
}

/// One row of the guesses table.
///
/// Slots without a block carry no guess and no proposer index; they exist so
/// every completed batch leaves a dense slot sequence behind.
#[derive(Debug, Clone, PartialEq)]
pub struct GuessRow {
    pub slot: Slot,
    pub guess: Option<Guess>,
    pub proposer_index: Option<u64>,
}

impl GuessRow {
    pub fn classified(record: &RewardRecord, guess: Guess) -> Self {
        Self {
            slot: record.slot,
            guess: Some(guess),
            proposer_index: Some(record.proposer_index),
        }
    }

    pub fn placeholder(slot: Slot) -> Self {
        Self {
            slot,
            guess: None,
            proposer_index: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.guess.is_none()
    }

    pub fn best_guess_single(&self) -> &str {
        self.guess
            .as_ref()
            .map(|guess| guess.best_guess_single.as_str())
            .unwrap_or_default()
    }

    pub fn best_guess_multi(&self) -> &str {
        self.guess
            .as_ref()
            .map(|guess| guess.best_guess_multi.as_str())
            .unwrap_or_default()
    }

    pub fn probability_array(&self) -> Vec<String> {
        self.guess
            .as_ref()
            .map(|guess| guess.probability_map.to_text_array())
            .unwrap_or_default()
    }
}
