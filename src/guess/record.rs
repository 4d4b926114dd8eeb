use anyhow::{anyhow, Context, Result};
use serde_json::Value;

pub type Slot = u64;

/// Block reward data for one occupied slot as reported by the beacon node.
///
/// The full JSON document is retained untouched in `payload` because the
/// classifier consumes it as-is; only the fields the sync engine itself needs
/// are lifted out.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardRecord {
    pub slot: Slot,
    pub proposer_index: u64,
    pub graffiti: Option<String>,
    pub payload: Value,
}

impl RewardRecord {
    /// Parses one entry of the `block_rewards` analysis response. Numeric
    /// fields are accepted either quoted or bare.
    pub fn from_value(payload: Value) -> Result<Self> {
        let meta = payload
            .get("meta")
            .ok_or_else(|| anyhow!("block reward entry is missing `meta`"))?;
        let slot = read_u64(meta, "slot").context("invalid block reward meta")?;
        let proposer_index = read_u64(meta, "proposer_index")
            .with_context(|| format!("invalid block reward meta for slot {slot}"))?;
        let graffiti = meta
            .get("graffiti")
            .and_then(Value::as_str)
            .map(|graffiti| graffiti.trim_end_matches('\0').to_owned())
            .filter(|graffiti| !graffiti.is_empty());

        Ok(Self {
            slot,
            proposer_index,
            graffiti,
            payload,
        })
    }
}

fn read_u64(object: &Value, field: &str) -> Result<u64> {
    match object.get(field) {
        Some(Value::Number(number)) => number
            .as_u64()
            .ok_or_else(|| anyhow!("`{field}` is not an unsigned integer")),
        Some(Value::String(text)) => text
            .parse::<u64>()
            .with_context(|| format!("`{field}` is not an unsigned integer: {text:?}")),
        Some(_) => Err(anyhow!("`{field}` has an unexpected type")),
        None => Err(anyhow!("`{field}` is missing")),
    }
}
