//! Decoding of device telemetry payloads.
//!
//! # Decoder policy
//!
//! The payload is the JSON document served by a device's stats endpoint:
//! an `INFO` object and a `STATS` array. Decoding is deliberately
//! forgiving about content and strict about shape:
//!
//! - Unknown fields, at any depth, are ignored.
//! - Missing or `null` numbers read as zero; missing or `null` strings
//!   read as empty.
//! - Numbers sent as JSON strings (`"525"`) are accepted when they parse.
//! - A top level that is not an object, an `INFO` that is not an object,
//!   or a `STATS` that is not an array of objects is
//!   [`DecodeError::Malformed`].
//! - An empty or absent `STATS` array is [`DecodeError::NoStats`]; a
//!   zero-filled reading is never produced in its place.
//! - Only `STATS[0]` is read. Further elements are ignored.

mod wire;

use serde_json::Value;
use thiserror::Error;

use crate::model::{ChainReading, TelemetryReading};
use crate::tracing::prelude::*;

use wire::{ChainItem, StatsResponse};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed telemetry payload: {0}")]
    Malformed(String),

    #[error("telemetry payload has no stats")]
    NoStats,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

/// Decode a stats payload into a [`TelemetryReading`].
pub fn decode(payload: &[u8]) -> Result<TelemetryReading, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    check_shape(&value)?;

    let response: StatsResponse = serde_json::from_value(value)?;

    let mut stats = response.stats.unwrap_or_default().into_iter();
    let first = stats.next().ok_or(DecodeError::NoStats)?;
    let extra = stats.count();
    if extra > 0 {
        debug!(extra, "Ignoring additional stats blocks");
    }

    let info = response.info.unwrap_or_default();

    Ok(TelemetryReading {
        miner_type: info.miner_type,
        miner_version: info.miner_version,
        compile_time: info.compile_time,
        elapsed_secs: first.elapsed,
        rate_5s: first.rate_5s,
        rate_30m: first.rate_30m,
        rate_avg: first.rate_avg,
        rate_ideal: first.rate_ideal,
        rate_unit: first.rate_unit,
        fan_count: first.fan_num,
        hwp_total: first.hwp_total,
        chains: first
            .chain
            .unwrap_or_default()
            .into_iter()
            .map(ChainReading::from)
            .collect(),
    })
}

/// Reject documents whose containers are the wrong JSON type.
///
/// Serde would otherwise happily read a JSON array into a struct by
/// position.
fn check_shape(value: &Value) -> Result<(), DecodeError> {
    let Some(root) = value.as_object() else {
        return Err(DecodeError::Malformed("top level is not an object".into()));
    };

    if let Some(info) = root.get("INFO") {
        if !(info.is_object() || info.is_null()) {
            return Err(DecodeError::Malformed("INFO is not an object".into()));
        }
    }

    match root.get("STATS") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                if !item.is_object() {
                    return Err(DecodeError::Malformed(
                        "STATS element is not an object".into(),
                    ));
                }
                if let Some(chains) = item.get("chain") {
                    let ok = match chains {
                        Value::Null => true,
                        Value::Array(chains) => chains.iter().all(Value::is_object),
                        _ => false,
                    };
                    if !ok {
                        return Err(DecodeError::Malformed(
                            "chain is not an array of objects".into(),
                        ));
                    }
                }
            }
        }
        Some(_) => return Err(DecodeError::Malformed("STATS is not an array".into())),
    }

    Ok(())
}

impl From<ChainItem> for ChainReading {
    fn from(chain: ChainItem) -> Self {
        Self {
            index: chain.index,
            freq_avg: chain.freq_avg,
            rate_ideal: chain.rate_ideal,
            rate_real: chain.rate_real,
            asic_count: chain.asic_num,
            hw_errors: chain.hw,
            hw_error_pct: chain.hwp,
        }
    }
}
