//! Fleet telemetry poller for network-attached mining devices.
//!
//! The crate discovers devices from a pool directory, probes each
//! device's management endpoint for live stats under a bounded
//! concurrency gate, and persists normalized snapshots for reporting.

pub mod config;
pub mod directory;
pub mod error;
pub mod model;
pub mod probe;
pub mod report;
pub mod scanner;
pub mod store;
pub mod telemetry;
pub mod tracing;
pub mod types;
