//! Runtime glue that wires configuration, lifecycle, fatal error handling,
//! telemetry, and runner orchestration around the ingestion pipeline.

pub mod config;
pub mod fatal;
pub(crate) mod lifecycle;
pub mod pipeline;
pub mod runner;
pub mod telemetry;
