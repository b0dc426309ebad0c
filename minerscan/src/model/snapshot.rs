use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Device;
use crate::types::{HashRateUnit, normalize};

/// Row id assigned by the store when a snapshot is saved.
pub type SnapshotId = i64;

/// Telemetry as reported by a device, before it is tied to a device
/// identity. Produced by [`crate::telemetry::decode`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TelemetryReading {
    pub miner_type: String,
    pub miner_version: String,
    pub compile_time: String,
    pub elapsed_secs: i64,
    pub rate_5s: f64,
    pub rate_30m: f64,
    pub rate_avg: f64,
    pub rate_ideal: f64,
    /// Unit for all four `rate_*` values, as reported ("GH/s" on most
    /// Antminer firmware).
    pub rate_unit: String,
    pub fan_count: i32,
    /// Aggregate hardware-error percentage.
    pub hwp_total: f64,
    pub chains: Vec<ChainReading>,
}

impl TelemetryReading {
    pub fn rate_avg_terahashes(&self) -> f64 {
        normalize(self.rate_avg, &self.rate_unit)
    }

    pub fn rate_ideal_terahashes(&self) -> f64 {
        normalize(self.rate_ideal, &self.rate_unit)
    }

    /// Whether `rate_unit` was recognized, i.e. the TH/s values are real
    /// conversions rather than passed-through numbers.
    pub fn unit_verified(&self) -> bool {
        HashRateUnit::parse(&self.rate_unit).is_some()
    }
}

/// One hashboard's figures.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ChainReading {
    pub index: i32,
    /// Average chip frequency (MHz).
    pub freq_avg: f64,
    pub rate_ideal: f64,
    pub rate_real: f64,
    pub asic_count: i32,
    pub hw_errors: i64,
    pub hw_error_pct: f64,
}

/// A reading bound to the device it came from and the time it was taken.
///
/// Immutable once saved; stores only ever append these.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TelemetrySnapshot {
    pub device_id: String,
    /// Address the reading was fetched from.
    pub ip: String,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub reading: TelemetryReading,
}

impl TelemetrySnapshot {
    pub fn new(device: &Device, reading: TelemetryReading, captured_at: OffsetDateTime) -> Self {
        Self {
            device_id: device.device_id.clone(),
            ip: device.ip.clone(),
            captured_at,
            reading,
        }
    }
}
