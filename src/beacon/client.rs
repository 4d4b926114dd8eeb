//! HTTP client for a Lighthouse beacon node, implementing [`ChainDataSource`]
//! on top of the block-reward analysis endpoint and the standard head header.

use crate::beacon::metrics::{BeaconMetrics, BeaconMetricsSnapshot};
use crate::beacon::options::BeaconClientOptions;
use crate::beacon::source::{ChainDataSource, ChainError};
use crate::guess::record::{RewardRecord, Slot};
use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;

const BLOCK_REWARDS_PATH: &str = "lighthouse/analysis/block_rewards";
const HEAD_HEADER_PATH: &str = "eth/v1/beacon/headers/head";

#[derive(Debug, Clone)]
pub struct BeaconClient {
    base_url: Arc<String>,
    http: reqwest::Client,
    metrics: Arc<BeaconMetrics>,
}

impl BeaconClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, BeaconClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: BeaconClientOptions) -> Result<Self> {
        options.validate()?;

        let base_url = url.into().trim().trim_end_matches('/').to_owned();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("beacon node url must start with http:// or https://");
        }

        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .context("failed to build beacon HTTP client")?;

        Ok(Self {
            base_url: Arc::new(base_url),
            http,
            metrics: Arc::new(BeaconMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> BeaconMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn block_rewards(&self, start: Slot, end: Slot) -> Result<Vec<RewardRecord>> {
        let url = format!("{}/{BLOCK_REWARDS_PATH}", self.base_url);
        let started = Instant::now();

        let response = self
            .http
            .get(&url)
            .query(&[("start_slot", start), ("end_slot", end)])
            .send()
            .await
            .map_err(|err| self.transport_error("block_rewards", err, started))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            self.metrics.record_range_unavailable(started.elapsed());
            tracing::debug!(
                start_slot = start,
                end_slot = end,
                "beacon node reports range beyond head"
            );
            return Err(ChainError::RangeUnavailable { start, end }.into());
        }
        if !status.is_success() {
            self.metrics.record_failure(started.elapsed());
            bail!("beacon block_rewards {start}..={end} failed with HTTP {status}");
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| self.transport_error("block_rewards", err, started))?;
        self.metrics.record_success(started.elapsed());

        let records = parse_block_rewards(body)
            .with_context(|| format!("malformed block_rewards response for {start}..={end}"))?;
        tracing::debug!(
            start_slot = start,
            end_slot = end,
            records = records.len(),
            "fetched block rewards"
        );
        Ok(records)
    }

    pub async fn get_head_slot(&self) -> Result<Slot> {
        let url = format!("{}/{HEAD_HEADER_PATH}", self.base_url);
        let started = Instant::now();

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| self.transport_error("head_header", err, started))?;

        let status = response.status();
        if !status.is_success() {
            self.metrics.record_failure(started.elapsed());
            bail!("beacon head header request failed with HTTP {status}");
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| self.transport_error("head_header", err, started))?;
        self.metrics.record_success(started.elapsed());

        let slot = body
            .pointer("/data/header/message/slot")
            .ok_or_else(|| anyhow!("head header response is missing data.header.message.slot"))?;
        let slot = match slot {
            Value::String(text) => text
                .parse::<Slot>()
                .with_context(|| format!("invalid head slot {text:?}"))?,
            Value::Number(number) => number
                .as_u64()
                .ok_or_else(|| anyhow!("invalid head slot {number}"))?,
            other => bail!("invalid head slot {other}"),
        };

        tracing::trace!(head_slot = slot, "refreshed chain head");
        Ok(slot)
    }

    fn transport_error(
        &self,
        operation: &'static str,
        err: reqwest::Error,
        started: Instant,
    ) -> anyhow::Error {
        if err.is_timeout() {
            self.metrics.record_timeout(started.elapsed());
            return ChainError::Timeout { operation }.into();
        }
        self.metrics.record_failure(started.elapsed());
        anyhow!("beacon {operation} request failed: {err}")
    }
}

impl ChainDataSource for BeaconClient {
    fn fetch_rewards(&self, start: Slot, end: Slot) -> BoxFuture<'_, Result<Vec<RewardRecord>>> {
        Box::pin(self.block_rewards(start, end))
    }

    fn head_slot(&self) -> BoxFuture<'_, Result<Slot>> {
        Box::pin(self.get_head_slot())
    }
}

/// Accepts either a bare array or the `{ "data": [...] }` envelope and
/// returns the records sorted by slot.
fn parse_block_rewards(body: Value) -> Result<Vec<RewardRecord>> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(entries)) => entries,
            _ => bail!("expected an array of block rewards"),
        },
        _ => bail!("expected an array of block rewards"),
    };

    let mut records = entries
        .into_iter()
        .map(RewardRecord::from_value)
        .collect::<Result<Vec<_>>>()?;
    records.sort_by_key(|record| record.slot);
    Ok(records)
}
