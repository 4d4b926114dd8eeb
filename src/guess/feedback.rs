//! Best-effort feedback of self-identified blocks into the training set.

use super::client::ConsensusClient;
use super::record::RewardRecord;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};

/// Returns the client a proposer names in its graffiti, if exactly one known
/// client name appears in it.
pub fn graffiti_client(graffiti: &str) -> Option<ConsensusClient> {
    let lowered = graffiti.to_ascii_lowercase();
    let mut found = None;

    for client in ConsensusClient::ALL {
        let name = client.as_str().to_ascii_lowercase();
        if lowered.contains(&name) {
            if found.is_some() {
                return None;
            }
            found = Some(client);
        }
    }

    found
}

/// Capability that accepts labeled examples for future model training.
///
/// Failures are reported to the caller but never affect classification.
pub trait TrainingFeedback: Send + Sync {
    fn add_labeled<'a>(
        &'a self,
        client: ConsensusClient,
        record: &'a RewardRecord,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Stores labeled reward records as `<root>/<Client>/<slot>.json`.
#[derive(Debug, Clone)]
pub struct TrainingDirFeedback {
    root: PathBuf,
}

impl TrainingDirFeedback {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn example_path(&self, client: ConsensusClient, record: &RewardRecord) -> PathBuf {
        self.root
            .join(client.as_str())
            .join(format!("{}.json", record.slot))
    }

    async fn write_example(&self, client: ConsensusClient, record: &RewardRecord) -> Result<()> {
        let path = self.example_path(client, record);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let body = serde_json::to_vec(&record.payload)
            .with_context(|| format!("failed to encode slot {}", record.slot))?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        tracing::debug!(
            slot = record.slot,
            client = %client,
            path = %path.display(),
            "added labeled block to training set"
        );
        Ok(())
    }
}

impl TrainingFeedback for TrainingDirFeedback {
    fn add_labeled<'a>(
        &'a self,
        client: ConsensusClient,
        record: &'a RewardRecord,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_example(client, record))
    }
}
