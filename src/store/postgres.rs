use super::{validate_table_name, GuessStore, StoreError};
use crate::guess::record::Slot;
use crate::guess::row::GuessRow;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TABLE_NAME: &str = "t_slot_client_guesses";

// Five binds per row keeps each statement well below the 65535 parameter cap.
const UPSERT_CHUNK_ROWS: usize = 1_000;
const MAX_POOL_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PostgresGuessStore {
    pool: PgPool,
    table: String,
}

struct EncodedRow {
    slot: i64,
    best_guess_single: String,
    best_guess_multi: String,
    probability_map: Vec<String>,
    proposer_index: Option<i64>,
}

impl EncodedRow {
    fn encode(row: &GuessRow) -> Result<Self> {
        Ok(Self {
            slot: to_i64(row.slot, "slot")?,
            best_guess_single: row.best_guess_single().to_owned(),
            best_guess_multi: row.best_guess_multi().to_owned(),
            probability_map: row.probability_array(),
            proposer_index: row
                .proposer_index
                .map(|index| to_i64(index, "proposer_index"))
                .transpose()?,
        })
    }
}

impl PostgresGuessStore {
    /// Builds a pool that opens its first connection on first use, so an
    /// unreachable database surfaces as a retryable [`StoreError`] from
    /// `create_table` rather than failing here. Only a malformed URL errors.
    pub fn connect_lazy(url: &str, table: impl Into<String>) -> Result<Self> {
        let options =
            PgConnectOptions::from_str(url).context("invalid postgres connection string")?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);
        Self::from_pool(pool, table)
    }

    pub fn from_pool(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn create_table_inner(&self, replace: bool) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::new("create_table", err))?;

        if replace {
            tracing::warn!(table = %self.table, "dropping guesses table for reindex");
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
                .execute(&mut *tx)
                .await
                .map_err(|err| StoreError::new("create_table", err))?;
        }

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             f_slot BIGINT NOT NULL, \
             f_best_guess_single TEXT NOT NULL, \
             f_best_guess_multi TEXT NOT NULL, \
             f_probability_map TEXT[] NOT NULL, \
             f_proposer_index BIGINT, \
             CONSTRAINT {table}_pkey PRIMARY KEY (f_slot))",
            table = self.table
        );
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err(|err| StoreError::new("create_table", err))?;

        tx.commit()
            .await
            .map_err(|err| StoreError::new("create_table", err))?;
        Ok(())
    }

    async fn upsert_inner(&self, rows: &[GuessRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let encoded = rows
            .iter()
            .map(EncodedRow::encode)
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::new("upsert", err))?;

        for chunk in encoded.chunks(UPSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (f_slot, f_best_guess_single, f_best_guess_multi, \
                 f_probability_map, f_proposer_index) ",
                self.table
            ));
            builder.push_values(chunk, |mut values, row| {
                values
                    .push_bind(row.slot)
                    .push_bind(row.best_guess_single.clone())
                    .push_bind(row.best_guess_multi.clone())
                    .push_bind(row.probability_map.clone())
                    .push_bind(row.proposer_index);
            });
            builder.push(
                " ON CONFLICT (f_slot) DO UPDATE SET \
                 f_best_guess_single = EXCLUDED.f_best_guess_single, \
                 f_best_guess_multi = EXCLUDED.f_best_guess_multi, \
                 f_probability_map = EXCLUDED.f_probability_map, \
                 f_proposer_index = EXCLUDED.f_proposer_index",
            );

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|err| StoreError::new("upsert", err))?;
        }

        tx.commit()
            .await
            .map_err(|err| StoreError::new("upsert", err))?;

        tracing::debug!(
            table = %self.table,
            rows = rows.len(),
            first_slot = rows.first().map(|row| row.slot),
            last_slot = rows.last().map(|row| row.slot),
            "upserted guess rows"
        );
        Ok(())
    }

    async fn max_slot_inner(&self) -> Result<Option<Slot>> {
        let max: Option<i64> =
            sqlx::query_scalar(&format!("SELECT MAX(f_slot) FROM {}", self.table))
                .fetch_one(&self.pool)
                .await
                .map_err(|err| StoreError::new("max_slot", err))?;

        max.map(|slot| {
            Slot::try_from(slot).with_context(|| format!("negative slot {slot} in guesses table"))
        })
        .transpose()
    }
}

impl GuessStore for PostgresGuessStore {
    fn create_table(&self, replace: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.create_table_inner(replace))
    }

    fn upsert<'a>(&'a self, rows: &'a [GuessRow]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.upsert_inner(rows))
    }

    fn max_slot(&self) -> BoxFuture<'_, Result<Option<Slot>>> {
        Box::pin(self.max_slot_inner())
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{field} {value} does not fit in BIGINT"))
}
