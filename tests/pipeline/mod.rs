mod clickhouse_store;
mod postgres_store;
