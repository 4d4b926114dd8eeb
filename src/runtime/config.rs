use crate::guess::computer::ComputerOptions;
use crate::guess::record::Slot;
use crate::runtime::telemetry;
use crate::store::{validate_table_name, StoreBackend, DEFAULT_TABLE_NAME};
use crate::sync::engine::EngineOptions;
use crate::sync::pacing::DEFAULT_SLOT_DURATION;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NODE_URL: &str = "http://localhost:5052";
pub const DEFAULT_BATCH_SIZE: u64 = 128;
pub const DEFAULT_WORKER_COUNT: usize = 16;
pub const DEFAULT_MIN_SUB_RANGE: u64 = 32;
pub const DEFAULT_MAX_RETRIES: usize = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Runtime configuration for the guess sync service.
///
/// All instances must be constructed via [`SyncConfig::builder`] or [`SyncConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    node_url: String,
    classifier_url: String,
    database_url: String,
    table_name: String,
    start_slot: Slot,
    end_slot: Option<Slot>,
    reindex: bool,
    batch_size: u64,
    worker_count: usize,
    min_sub_range: u64,
    max_retries: usize,
    retry_delay: Duration,
    fetch_timeout: Duration,
    slot_duration: Duration,
    idle_interval: Duration,
    metrics_interval: Duration,
    add_to_model: bool,
    training_dir: Option<PathBuf>,
}

pub struct SyncConfigParams {
    pub node_url: String,
    pub classifier_url: String,
    pub database_url: String,
    pub table_name: String,
    pub start_slot: Slot,
    pub end_slot: Option<Slot>,
    pub reindex: bool,
    pub batch_size: u64,
    pub worker_count: usize,
    pub min_sub_range: u64,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub fetch_timeout: Duration,
    pub slot_duration: Duration,
    pub idle_interval: Duration,
    pub metrics_interval: Duration,
    pub add_to_model: bool,
    pub training_dir: Option<PathBuf>,
}

impl SyncConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`SyncConfig::builder`] when most values use defaults.
    pub fn new(params: SyncConfigParams) -> Result<Self> {
        let SyncConfigParams {
            node_url,
            classifier_url,
            database_url,
            table_name,
            start_slot,
            end_slot,
            reindex,
            batch_size,
            worker_count,
            min_sub_range,
            max_retries,
            retry_delay,
            fetch_timeout,
            slot_duration,
            idle_interval,
            metrics_interval,
            add_to_model,
            training_dir,
        } = params;

        let config = Self {
            node_url: trimmed_string(node_url),
            classifier_url: trimmed_string(classifier_url),
            database_url: trimmed_string(database_url),
            table_name: trimmed_string(table_name),
            start_slot,
            end_slot,
            reindex,
            batch_size,
            worker_count,
            min_sub_range,
            max_retries,
            retry_delay,
            fetch_timeout,
            slot_duration,
            idle_interval,
            metrics_interval,
            add_to_model,
            training_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// Beacon node base URL.
    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    /// Base URL of the classification service.
    pub fn classifier_url(&self) -> &str {
        &self.classifier_url
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Store selected by the `database_url` scheme.
    pub fn store_backend(&self) -> StoreBackend {
        StoreBackend::from_url(&self.database_url).unwrap_or(StoreBackend::Postgres)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// First slot classified when the table is empty.
    pub fn start_slot(&self) -> Slot {
        self.start_slot
    }

    /// When set, the service syncs up to this slot and exits.
    pub fn end_slot(&self) -> Option<Slot> {
        self.end_slot
    }

    pub fn reindex(&self) -> bool {
        self.reindex
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn min_sub_range(&self) -> u64 {
        self.min_sub_range
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Deadline for one sub-range fetch, also used as the HTTP request timeout.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Whether graffiti-labeled blocks are written to the training directory.
    pub fn add_to_model(&self) -> bool {
        self.add_to_model
    }

    pub fn training_dir(&self) -> Option<&Path> {
        self.training_dir.as_deref()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            slot_duration: self.slot_duration,
            idle_interval: self.idle_interval,
            start_slot: self.start_slot,
            reindex: self.reindex,
        }
    }

    pub fn computer_options(&self) -> ComputerOptions {
        ComputerOptions {
            worker_count: self.worker_count,
            min_sub_range: self.min_sub_range,
            fetch_timeout: self.fetch_timeout,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.node_url, "node_url")?;
        validate_url(&self.classifier_url, "classifier_url")?;
        validate_database_url(&self.database_url)?;
        validate_table_name(&self.table_name)?;

        if let Some(end_slot) = self.end_slot {
            if end_slot < self.start_slot {
                bail!(
                    "end_slot ({end_slot}) must not be below start_slot ({})",
                    self.start_slot
                );
            }
        }

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if self.min_sub_range == 0 {
            bail!("min_sub_range must be greater than 0");
        }

        if self.max_retries == 0 {
            bail!("max_retries must be greater than 0");
        }

        if self.retry_delay.is_zero() {
            bail!("retry_delay must be greater than 0");
        }

        if self.fetch_timeout.is_zero() {
            bail!("fetch_timeout must be greater than 0");
        }

        if self.slot_duration.is_zero() {
            bail!("slot_duration must be greater than 0");
        }

        if self.idle_interval.is_zero() {
            bail!("idle_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.add_to_model && self.training_dir.is_none() {
            bail!("training_dir is required when add_to_model is enabled");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncConfigBuilder {
    node_url: Option<String>,
    classifier_url: Option<String>,
    database_url: Option<String>,
    table_name: Option<String>,
    start_slot: Option<Slot>,
    end_slot: Option<Slot>,
    reindex: bool,
    batch_size: Option<u64>,
    worker_count: Option<usize>,
    min_sub_range: Option<u64>,
    max_retries: Option<usize>,
    retry_delay: Option<Duration>,
    fetch_timeout: Option<Duration>,
    slot_duration: Option<Duration>,
    idle_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    add_to_model: bool,
    training_dir: Option<PathBuf>,
}

impl SyncConfigBuilder {
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.node_url = Some(url.into());
        self
    }

    pub fn classifier_url(mut self, url: impl Into<String>) -> Self {
        self.classifier_url = Some(url.into());
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn start_slot(mut self, slot: Slot) -> Self {
        self.start_slot = Some(slot);
        self
    }

    pub fn end_slot(mut self, slot: Option<Slot>) -> Self {
        self.end_slot = slot;
        self
    }

    pub fn reindex(mut self, reindex: bool) -> Self {
        self.reindex = reindex;
        self
    }

    pub fn batch_size(mut self, size: u64) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn min_sub_range(mut self, slots: u64) -> Self {
        self.min_sub_range = Some(slots);
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn slot_duration(mut self, duration: Duration) -> Self {
        self.slot_duration = Some(duration);
        self
    }

    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn add_to_model(mut self, enabled: bool) -> Self {
        self.add_to_model = enabled;
        self
    }

    pub fn training_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.training_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        let params = SyncConfigParams {
            node_url: self.node_url.unwrap_or_else(|| DEFAULT_NODE_URL.to_owned()),
            classifier_url: self.classifier_url.context("classifier_url is required")?,
            database_url: self.database_url.context("database_url is required")?,
            table_name: self
                .table_name
                .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_owned()),
            start_slot: self.start_slot.unwrap_or(0),
            end_slot: self.end_slot,
            reindex: self.reindex,
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            min_sub_range: self.min_sub_range.unwrap_or(DEFAULT_MIN_SUB_RANGE),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
            fetch_timeout: self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
            slot_duration: self.slot_duration.unwrap_or(DEFAULT_SLOT_DURATION),
            idle_interval: self.idle_interval.unwrap_or(DEFAULT_IDLE_INTERVAL),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            add_to_model: self.add_to_model,
            training_dir: self.training_dir,
        };

        SyncConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}

fn validate_database_url(url: &str) -> Result<()> {
    StoreBackend::from_url(url).map(|_| ())
}
