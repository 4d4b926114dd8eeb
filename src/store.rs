//! Persistence seam for guess rows with Postgres and ClickHouse
//! implementations.
//!
//! The table is the only checkpoint the sync engine has: `max_slot` is read
//! on startup and every batch is written through a single `upsert` call.

pub mod clickhouse;
pub mod postgres;

pub use clickhouse::ClickHouseGuessStore;
pub use postgres::{PostgresGuessStore, DEFAULT_TABLE_NAME};

use crate::guess::record::Slot;
use crate::guess::row::GuessRow;
use anyhow::{bail, Error as AnyError, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Which store a database URL selects, decided by its scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    ClickHouse,
}

impl StoreBackend {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.trim().split_once("://").map(|(scheme, _)| scheme);
        match scheme {
            Some("postgres" | "postgresql") => Ok(Self::Postgres),
            Some("clickhouse" | "clickhouses") => Ok(Self::ClickHouse),
            _ => bail!(
                "database_url must start with postgres://, postgresql://, clickhouse:// or clickhouses://"
            ),
        }
    }
}

/// Opens the store named by `url` without contacting it; connection problems
/// show up on first use, where the engine retries them.
pub fn open_guess_store(
    url: &str,
    table: &str,
    request_timeout: Duration,
) -> Result<Arc<dyn GuessStore>> {
    let store: Arc<dyn GuessStore> = match StoreBackend::from_url(url)? {
        StoreBackend::Postgres => Arc::new(PostgresGuessStore::connect_lazy(url, table)?),
        StoreBackend::ClickHouse => {
            Arc::new(ClickHouseGuessStore::new(url, table, request_timeout)?)
        }
    };
    Ok(store)
}

/// A store operation failed. Always considered transient by the engine.
#[derive(Debug)]
pub struct StoreError {
    operation: &'static str,
    source: AnyError,
}

impl StoreError {
    pub fn new(operation: &'static str, source: impl Into<AnyError>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "guess store {} failed: {}", self.operation, self.source)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

pub trait GuessStore: Send + Sync {
    /// Creates the table if it is missing. With `replace` the table is dropped
    /// first, discarding all progress.
    fn create_table(&self, replace: bool) -> BoxFuture<'_, Result<()>>;

    /// Writes all rows in one transaction; existing slots are overwritten.
    fn upsert<'a>(&'a self, rows: &'a [GuessRow]) -> BoxFuture<'a, Result<()>>;

    fn max_slot(&self) -> BoxFuture<'_, Result<Option<Slot>>>;
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        bail!("table_name cannot be empty");
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        bail!("table_name must start with a letter or underscore");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("table_name may only contain letters, digits and underscores");
    }
    if name.len() > 63 {
        bail!("table_name must be at most 63 characters");
    }
    Ok(())
}
