//! Beacon node access: the chain data source seam, an HTTP implementation
//! against a Lighthouse node, client options, and request metrics.

pub mod client;
pub mod metrics;
pub mod options;
pub mod source;

pub use client::BeaconClient;
pub use metrics::BeaconMetricsSnapshot;
pub use options::BeaconClientOptions;
pub use source::{is_range_unavailable, ChainDataSource, ChainError};
