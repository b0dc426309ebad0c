//! Domain records: devices from the pool directory and the telemetry
//! snapshots read from them.

mod device;
mod snapshot;

pub use device::{DEFAULT_ADDRESS_PREFIX, Device, PoolHashRate, derive_address};
pub use snapshot::{ChainReading, SnapshotId, TelemetryReading, TelemetrySnapshot};
