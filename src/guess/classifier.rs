//! Classification seam. The model itself lives outside this crate; the sync
//! engine only needs something that turns one reward record into a [`Guess`].

use super::client::{ConsensusClient, ProbabilityMap};
use super::record::{RewardRecord, Slot};
use super::row::Guess;
use anyhow::{anyhow, bail, Context, Error as AnyError, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// A record could not be classified.
///
/// Permanent failures (malformed record, unusable model answer) abort the
/// batch for good; transient ones (classifier unreachable) go through the
/// regular retry budget.
#[derive(Debug)]
pub struct ClassificationError {
    slot: Slot,
    transient: bool,
    source: AnyError,
}

impl ClassificationError {
    pub fn permanent(slot: Slot, source: AnyError) -> Self {
        Self {
            slot,
            transient: false,
            source,
        }
    }

    pub fn transient(slot: Slot, source: AnyError) -> Self {
        Self {
            slot,
            transient: true,
            source,
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl std::fmt::Display for ClassificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to classify slot {}: {}", self.slot, self.source)
    }
}

impl std::error::Error for ClassificationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

pub trait Classifier: Send + Sync {
    /// Deterministic for a given model state. Failures should be reported as
    /// [`ClassificationError`] so the engine can tell retryable ones apart.
    fn classify<'a>(&'a self, record: &'a RewardRecord) -> BoxFuture<'a, Result<Guess>>;
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    best_guess_single: String,
    best_guess_multi: String,
    probability_map: BTreeMap<String, f64>,
}

impl ClassifyResponse {
    fn into_guess(self) -> Result<Guess> {
        let best_guess_single = self
            .best_guess_single
            .parse::<ConsensusClient>()
            .context("invalid best_guess_single")?;
        let probability_map = ProbabilityMap::from_pairs(
            self.probability_map
                .iter()
                .map(|(client, probability)| (client.as_str(), *probability)),
        )
        .context("invalid probability_map")?;

        if !probability_map.is_normalized() {
            bail!(
                "probability_map sums to {} instead of 1",
                probability_map.total()
            );
        }

        Ok(Guess {
            best_guess_single,
            best_guess_multi: self.best_guess_multi,
            probability_map,
        })
    }
}

/// Classifier backed by a blockprint-compatible HTTP service
/// (`POST /classify/no_store` with a list of block rewards).
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build classifier HTTP client")?;
        Ok(Self {
            endpoint: format!("{}/classify/no_store", base_url.trim_end_matches('/')),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn classify_one(&self, record: &RewardRecord) -> Result<Guess> {
        let slot = record.slot;
        let response = self
            .http
            .post(&self.endpoint)
            .json(&[&record.payload])
            .send()
            .await
            .map_err(|err| ClassificationError::transient(slot, err.into()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClassificationError::transient(
                slot,
                anyhow!("classifier returned HTTP {status}"),
            )
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::permanent(
                slot,
                anyhow!("classifier rejected record with HTTP {status}: {body}"),
            )
            .into());
        }

        let mut guesses: Vec<ClassifyResponse> = response
            .json()
            .await
            .map_err(|err| ClassificationError::permanent(slot, err.into()))?;
        if guesses.len() != 1 {
            return Err(ClassificationError::permanent(
                slot,
                anyhow!("classifier returned {} guesses for one record", guesses.len()),
            )
            .into());
        }

        guesses
            .remove(0)
            .into_guess()
            .map_err(|err| ClassificationError::permanent(slot, err).into())
    }
}

impl Classifier for HttpClassifier {
    fn classify<'a>(&'a self, record: &'a RewardRecord) -> BoxFuture<'a, Result<Guess>> {
        Box::pin(self.classify_one(record))
    }
}
