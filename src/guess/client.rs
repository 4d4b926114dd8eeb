//! Closed set of consensus clients the classifier can attribute a slot to,
//! plus the fixed-layout probability map keyed by that set.

use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

/// Tolerance used when checking that a probability map sums to one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConsensusClient {
    Lighthouse,
    Lodestar,
    Nimbus,
    Prysm,
    Teku,
}

impl ConsensusClient {
    pub const COUNT: usize = 5;

    pub const ALL: [ConsensusClient; Self::COUNT] = [
        ConsensusClient::Lighthouse,
        ConsensusClient::Lodestar,
        ConsensusClient::Nimbus,
        ConsensusClient::Prysm,
        ConsensusClient::Teku,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConsensusClient::Lighthouse => "Lighthouse",
            ConsensusClient::Lodestar => "Lodestar",
            ConsensusClient::Nimbus => "Nimbus",
            ConsensusClient::Prysm => "Prysm",
            ConsensusClient::Teku => "Teku",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ConsensusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusClient {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        for client in Self::ALL {
            if client.as_str().eq_ignore_ascii_case(trimmed) {
                return Ok(client);
            }
        }
        bail!("unknown consensus client {trimmed:?}")
    }
}

/// Per-client probabilities laid out in [`ConsensusClient::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbabilityMap {
    values: [f64; ConsensusClient::COUNT],
}

impl ProbabilityMap {
    /// Builds a map from `(client name, probability)` pairs. Unknown or repeated
    /// client names are rejected; clients that are absent read as zero.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut map = Self::default();
        let mut seen = [false; ConsensusClient::COUNT];

        for (name, probability) in pairs {
            let client = ConsensusClient::from_str(name)?;
            if seen[client.index()] {
                bail!("duplicate probability for client {client}");
            }
            if !probability.is_finite() || probability < 0.0 {
                bail!("invalid probability {probability} for client {client}");
            }
            seen[client.index()] = true;
            map.values[client.index()] = probability;
        }

        Ok(map)
    }

    pub fn get(&self, client: ConsensusClient) -> f64 {
        self.values[client.index()]
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn is_normalized(&self) -> bool {
        (self.total() - 1.0).abs() <= PROBABILITY_TOLERANCE
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConsensusClient, f64)> + '_ {
        ConsensusClient::ALL
            .iter()
            .map(move |client| (*client, self.get(*client)))
    }

    /// Text-array encoding stored in the guesses table, e.g. `Lighthouse:0.75`.
    pub fn to_text_array(&self) -> Vec<String> {
        self.iter()
            .map(|(client, probability)| format!("{client}:{probability}"))
            .collect()
    }
}
