use crate::beacon::{BeaconClient, BeaconClientOptions, ChainDataSource};
use crate::guess::classifier::{Classifier, HttpClassifier};
use crate::guess::computer::{BatchGuessComputer, ComputerOptions};
use crate::guess::feedback::{TrainingDirFeedback, TrainingFeedback};
use crate::guess::record::Slot;
use crate::guess::row::GuessRow;
use crate::runtime::config::SyncConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::store::{open_guess_store, GuessStore};
use crate::sync::backoff::is_cancelled;
use crate::sync::engine::SyncEngine;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Wires the beacon node, classifier, store and feedback sink into a sync
/// engine and owns the shutdown token that stops it.
pub struct Runner {
    config: SyncConfig,
    shutdown: CancellationToken,
    telemetry: Arc<Telemetry>,
}

impl Runner {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Connects to the configured services and syncs until shutdown, the end
    /// slot, or a fatal error.
    pub async fn run(&self) -> Result<()> {
        let config = &self.config;

        let source = BeaconClient::with_options(
            config.node_url(),
            BeaconClientOptions {
                request_timeout: config.fetch_timeout(),
                ..BeaconClientOptions::default()
            },
        )?;
        let classifier = HttpClassifier::new(config.classifier_url(), config.fetch_timeout())?;
        let store = open_guess_store(
            config.database_url(),
            config.table_name(),
            config.fetch_timeout(),
        )
        .context("failed to open guess store")?;
        let feedback = match (config.add_to_model(), config.training_dir()) {
            (true, Some(dir)) => {
                tracing::info!(training_dir = %dir.display(), "adding graffiti-labeled blocks to the training set");
                Some(Arc::new(TrainingDirFeedback::new(dir)) as Arc<dyn TrainingFeedback>)
            }
            _ => None,
        };

        tracing::info!(
            node_url = config.node_url(),
            classifier_url = config.classifier_url(),
            table = config.table_name(),
            store = ?config.store_backend(),
            "starting slot guess sync"
        );

        self.run_with(
            Arc::new(source),
            Arc::new(classifier),
            store,
            feedback,
        )
        .await
    }

    /// Runs the engine over caller-provided components.
    pub async fn run_with(
        &self,
        source: Arc<dyn ChainDataSource>,
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn GuessStore>,
        feedback: Option<Arc<dyn TrainingFeedback>>,
    ) -> Result<()> {
        let config = &self.config;

        let mut computer = BatchGuessComputer::new(
            Arc::clone(&source),
            classifier,
            config.computer_options(),
            Arc::clone(&self.telemetry),
        );
        if let Some(feedback) = feedback {
            computer = computer.with_feedback(feedback);
        }

        let mut engine = SyncEngine::new(
            source,
            computer,
            store,
            config.engine_options(),
            Arc::clone(&self.telemetry),
            self.shutdown.clone(),
        );

        let reporter_shutdown = self.shutdown.child_token();
        let reporter = spawn_metrics_reporter(
            Arc::clone(&self.telemetry),
            engine.checkpoint(),
            reporter_shutdown.clone(),
            config.metrics_interval(),
        );

        let result = match config.end_slot() {
            Some(end) => run_bounded(&mut engine, end).await,
            None => engine.run().await,
        };

        reporter_shutdown.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task failed");
        }

        result
    }

    /// Runs until a Ctrl-C (SIGINT) is received, the shutdown token is
    /// cancelled elsewhere, or the sync ends on its own.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; shutting down");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let result = self.run().await;

        self.shutdown.cancel();
        if let Err(err) = signal_task.await {
            tracing::warn!(error = %err, "signal handler task failed");
        }
        result
    }
}

/// Fetches and classifies the block at `slot` without touching any store.
/// An empty slot fails with [`crate::beacon::ChainError::EmptySlot`].
pub async fn lookup_slot(
    node_url: &str,
    classifier_url: &str,
    fetch_timeout: Duration,
    slot: Slot,
) -> Result<GuessRow> {
    let source = BeaconClient::with_options(
        node_url,
        BeaconClientOptions {
            request_timeout: fetch_timeout,
            ..BeaconClientOptions::default()
        },
    )?;
    let classifier = HttpClassifier::new(classifier_url, fetch_timeout)?;
    let computer = BatchGuessComputer::new(
        Arc::new(source),
        Arc::new(classifier),
        ComputerOptions {
            worker_count: 1,
            fetch_timeout,
            ..ComputerOptions::default()
        },
        Arc::new(Telemetry::default()),
    );
    computer
        .guess_slot(slot)
        .await
        .with_context(|| format!("failed to guess the client for slot {slot}"))
}

async fn run_bounded(engine: &mut SyncEngine, end: u64) -> Result<()> {
    match engine.initialize().await {
        Err(err) if is_cancelled(&err) => return Ok(()),
        other => other?,
    }

    let start = engine.cursor();
    if start > end {
        tracing::info!(
            cursor = start,
            end_slot = end,
            "table already covers the requested end slot"
        );
        return Ok(());
    }
    engine.run_range(start, end).await
}
