//! Runtime glue that wires configuration, checkpoint tracking, telemetry, and
//! runner orchestration.

pub mod config;
pub mod progress;
pub mod runner;
pub mod telemetry;
