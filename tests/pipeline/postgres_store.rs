use std::sync::Arc;

use crate::support::{
    helpers::{computer_options, fast_options, init_tracing, postgres_url, POSTGRES_GUARD},
    scripted_chain::{deterministic_guess, DeterministicClassifier, ScriptedChain},
};
use anyhow::Result;
use slotprint::{
    BatchGuessComputer, GuessRow, GuessStore, PostgresGuessStore, SyncEngine, Telemetry,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

const TEST_TABLE: &str = "t_slotprint_test_guesses";

type StoredRow = (i64, String, String, Vec<String>, Option<i64>);

async fn connect(url: &str) -> Result<(PgPool, PostgresGuessStore)> {
    let pool = PgPoolOptions::new().max_connections(2).connect(url).await?;
    let store = PostgresGuessStore::from_pool(pool.clone(), TEST_TABLE)?;
    store.create_table(true).await?;
    Ok((pool, store))
}

async fn stored_rows(pool: &PgPool) -> Result<Vec<StoredRow>> {
    let rows = sqlx::query_as::<_, StoredRow>(&format!(
        "SELECT f_slot, f_best_guess_single, f_best_guess_multi, f_probability_map, \
         f_proposer_index FROM {TEST_TABLE} ORDER BY f_slot"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

fn classified_row(slot: u64, proposer_index: u64) -> GuessRow {
    GuessRow {
        slot,
        guess: Some(deterministic_guess(proposer_index).expect("valid guess")),
        proposer_index: Some(proposer_index),
    }
}

#[tokio::test]
async fn postgres_upsert_is_last_write_wins() -> Result<()> {
    init_tracing();
    let Some(url) = postgres_url() else {
        tracing::info!("skipping postgres_upsert_is_last_write_wins (set SLOTPRINT_PG_URL)");
        return Ok(());
    };
    let _guard = POSTGRES_GUARD.lock().await;
    let (pool, store) = connect(&url).await?;

    assert_eq!(store.max_slot().await?, None);

    store
        .upsert(&[
            classified_row(10, 1),
            GuessRow::placeholder(11),
            classified_row(12, 2),
        ])
        .await?;
    assert_eq!(store.max_slot().await?, Some(12));

    store.upsert(&[classified_row(10, 3)]).await?;

    let rows = stored_rows(&pool).await?;
    assert_eq!(rows.len(), 3);
    let (slot, single, multi, probabilities, proposer) = &rows[0];
    assert_eq!(*slot, 10);
    assert_eq!(single, deterministic_guess(3)?.best_guess_single.as_str());
    assert_eq!(multi, &deterministic_guess(3)?.best_guess_multi);
    assert_eq!(probabilities.len(), 5);
    assert_eq!(*proposer, Some(3));

    let (_, single, multi, probabilities, proposer) = &rows[1];
    assert!(single.is_empty() && multi.is_empty() && probabilities.is_empty());
    assert_eq!(*proposer, None);
    Ok(())
}

#[tokio::test]
async fn postgres_reindex_drops_existing_rows() -> Result<()> {
    init_tracing();
    let Some(url) = postgres_url() else {
        tracing::info!("skipping postgres_reindex_drops_existing_rows (set SLOTPRINT_PG_URL)");
        return Ok(());
    };
    let _guard = POSTGRES_GUARD.lock().await;
    let (pool, store) = connect(&url).await?;

    store.upsert(&[classified_row(5, 1)]).await?;
    store.create_table(false).await?;
    assert_eq!(store.max_slot().await?, Some(5));

    store.create_table(true).await?;
    assert_eq!(store.max_slot().await?, None);
    assert!(stored_rows(&pool).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn engine_fills_postgres_table_densely() -> Result<()> {
    init_tracing();
    let Some(url) = postgres_url() else {
        tracing::info!("skipping engine_fills_postgres_table_densely (set SLOTPRINT_PG_URL)");
        return Ok(());
    };
    let _guard = POSTGRES_GUARD.lock().await;
    let (pool, store) = connect(&url).await?;

    let chain = Arc::new(ScriptedChain::new(2_500));
    let telemetry = Arc::new(Telemetry::default());
    let computer = BatchGuessComputer::new(
        chain.clone(),
        Arc::new(DeterministicClassifier::new()),
        computer_options(4),
        telemetry.clone(),
    );
    let mut engine = SyncEngine::new(
        chain,
        computer,
        Arc::new(store),
        fast_options(0, 1_200),
        telemetry,
        CancellationToken::new(),
    );
    engine.run_range(0, 2_399).await?;

    let rows = stored_rows(&pool).await?;
    let slots: Vec<i64> = rows.iter().map(|row| row.0).collect();
    assert_eq!(slots, (0..2_400).collect::<Vec<i64>>());
    assert_eq!(engine.checkpoint().last_persisted(), Some(2_399));
    Ok(())
}
