use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{computer_options, fast_options, init_tracing},
    mock_beacon::{MockBeaconServer, MockNode},
    mock_clickhouse::{MockClickHouse, MockClickHouseServer},
    scripted_chain::{expected_client, is_empty_slot, DeterministicClassifier, ScriptedChain},
};
use anyhow::Result;
use slotprint::{
    BatchGuessComputer, ClickHouseGuessStore, GuessRow, GuessStore, Runner, StoreBackend,
    SyncConfig, SyncEngine, Telemetry,
};
use tokio_util::sync::CancellationToken;

const TABLE: &str = "t_slot_client_guesses";

fn open_store(server: &MockClickHouseServer) -> Result<ClickHouseGuessStore> {
    ClickHouseGuessStore::new(&server.dsn(), TABLE, Duration::from_secs(5))
}

fn assert_dense_clickhouse_rows(state: &MockClickHouse, start: u64, end: u64) {
    assert_eq!(state.slots(), (start..=end).collect::<Vec<u64>>());
    for row in state.rows() {
        let slot = row["f_slot"].as_u64().expect("slot column");
        if is_empty_slot(slot) {
            assert_eq!(row["f_best_guess_single"], "", "slot {slot}");
            assert!(row["f_probability_map"].as_array().expect("array").is_empty());
            assert!(row["f_proposer_index"].is_null());
        } else {
            let proposer_index = slot * 3 + 1;
            assert_eq!(row["f_proposer_index"], proposer_index);
            assert_eq!(
                row["f_best_guess_single"],
                expected_client(proposer_index).as_str(),
                "slot {slot}"
            );
        }
    }
}

#[tokio::test]
async fn engine_fills_clickhouse_table_densely() -> Result<()> {
    init_tracing();
    let state = MockClickHouse::new();
    let server = MockClickHouseServer::start(state.clone()).await?;

    let chain = Arc::new(ScriptedChain::new(500));
    let telemetry = Arc::new(Telemetry::default());
    let computer = BatchGuessComputer::new(
        chain.clone(),
        Arc::new(DeterministicClassifier::new()),
        computer_options(3),
        telemetry.clone(),
    );
    let mut engine = SyncEngine::new(
        chain,
        computer,
        Arc::new(open_store(&server)?),
        fast_options(0, 64),
        telemetry,
        CancellationToken::new(),
    );
    engine.run_range(0, 199).await?;

    assert_dense_clickhouse_rows(&state, 0, 199);
    assert_eq!(engine.checkpoint().last_persisted(), Some(199));
    assert!(state
        .databases()
        .iter()
        .all(|database| database.as_deref() == Some("chain")));
    assert_eq!(state.authorized_requests(), state.statements().len());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn clickhouse_resume_and_reindex() -> Result<()> {
    init_tracing();
    let state = MockClickHouse::new();
    let server = MockClickHouseServer::start(state.clone()).await?;
    let store = open_store(&server)?;

    store.create_table(false).await?;
    assert_eq!(store.max_slot().await?, None);

    store
        .upsert(&[GuessRow::placeholder(20), GuessRow::placeholder(21)])
        .await?;
    store.upsert(&[GuessRow::placeholder(21)]).await?;
    assert_eq!(store.max_slot().await?, Some(21));
    assert_eq!(state.slots(), vec![20, 21]);

    store.create_table(false).await?;
    assert_eq!(store.max_slot().await?, Some(21), "create keeps existing rows");

    store.create_table(true).await?;
    assert_eq!(store.max_slot().await?, None);
    assert!(state
        .statements()
        .iter()
        .any(|statement| statement.contains("ENGINE = ReplacingMergeTree ORDER BY (f_slot)")));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn clickhouse_outage_at_startup_is_retried() -> Result<()> {
    init_tracing();
    let state = MockClickHouse::new();
    state.fail_next_requests(2);
    let server = MockClickHouseServer::start(state.clone()).await?;

    let chain = Arc::new(ScriptedChain::new(100));
    let telemetry = Arc::new(Telemetry::default());
    let computer = BatchGuessComputer::new(
        chain.clone(),
        Arc::new(DeterministicClassifier::new()),
        computer_options(1),
        telemetry.clone(),
    );
    let mut engine = SyncEngine::new(
        chain,
        computer,
        Arc::new(open_store(&server)?),
        fast_options(0, 32),
        telemetry.clone(),
        CancellationToken::new(),
    );

    engine.initialize().await?;

    assert_eq!(telemetry.snapshot().retries, 2);
    assert_eq!(engine.cursor(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_selects_clickhouse_from_the_database_url() -> Result<()> {
    init_tracing();
    let node = MockNode::new(80);
    let beacon = MockBeaconServer::start(node.clone()).await?;
    let state = MockClickHouse::new();
    let clickhouse = MockClickHouseServer::start(state.clone()).await?;

    let config = SyncConfig::builder()
        .node_url(beacon.url())
        .classifier_url(beacon.url())
        .database_url(clickhouse.dsn())
        .end_slot(Some(60))
        .batch_size(32)
        .worker_count(2)
        .min_sub_range(8)
        .retry_delay(Duration::from_millis(10))
        .fetch_timeout(Duration::from_secs(5))
        .metrics_interval(Duration::from_millis(50))
        .build()?;
    assert_eq!(config.store_backend(), StoreBackend::ClickHouse);

    Runner::new(config).run().await?;

    assert_dense_clickhouse_rows(&state, 0, 60);

    clickhouse.shutdown().await;
    beacon.shutdown().await;
    Ok(())
}
