use std::io::Write;

use serde::Serialize;

use super::{FleetEntry, csv_writer};
use crate::tracing::prelude::*;
use crate::types::TeraHashes;

pub const UNDERPERFORMING_HEADER: [&str; 6] = [
    "IP",
    "Miner Type",
    "Rate Avg (TH/s)",
    "Rate Ideal (TH/s)",
    "Rated Hashrate (TH/s)",
    "Difference (TH/s)",
];

/// Nameplate hashrate (TH/s) per reported miner type. Matched exactly
/// against the trimmed type string.
pub const RATED_HASHRATES: &[(&str, f64)] = &[
    ("Antminer U3S19XP+H (HashMaster)", 293.0),
    ("Antminer U3S19XP+H Ex", 293.0),
    ("Antminer U3S19EXPH (HashMaster)", 251.0),
    ("Antminer U3S19XP+H", 279.0),
    ("Antminer U3S19EXPH", 251.0),
    ("Antminer S19 XP+ Hyd (HashMaster)", 293.0),
    ("Antminer S19 XP+ Hyd.", 293.0),
    ("Antminer S19e XP Hyd Ex", 279.0),
];

pub fn rated_hashrate(miner_type: &str) -> Option<f64> {
    let miner_type = miner_type.trim();
    RATED_HASHRATES
        .iter()
        .find(|(name, _)| *name == miner_type)
        .map(|(_, rated)| *rated)
}

/// A device whose average hashrate is below its rating.
#[derive(Debug, Clone, PartialEq)]
pub struct Underperformer {
    pub ip: String,
    pub miner_type: String,
    pub rate_avg: f64,
    pub rate_ideal: f64,
    pub rated: f64,
}

impl Underperformer {
    /// Negative: how far below the rating the device runs.
    pub fn difference(&self) -> f64 {
        self.rate_avg - self.rated
    }
}

/// Devices with a snapshot of a rated type averaging below the rating.
///
/// Unknown types are not evaluated. Neither is a non-zero rate in an
/// unrecognized unit, since it cannot be compared in TH/s.
pub fn find_underperformers(entries: &[FleetEntry]) -> Vec<Underperformer> {
    entries
        .iter()
        .filter_map(|entry| {
            let reading = &entry.latest.as_ref()?.reading;
            let miner_type = reading.miner_type.trim();
            let rated = rated_hashrate(miner_type)?;

            if reading.rate_avg != 0.0 && !reading.unit_verified() {
                debug!(
                    device = %entry.device.device_id,
                    unit = %reading.rate_unit,
                    "Skipping rate in unrecognized unit"
                );
                return None;
            }

            let rate_avg = reading.rate_avg_terahashes();
            (rate_avg < rated).then(|| Underperformer {
                ip: entry.device.ip.clone(),
                miner_type: miner_type.to_string(),
                rate_avg,
                rate_ideal: reading.rate_ideal_terahashes(),
                rated,
            })
        })
        .collect()
}

#[derive(Serialize)]
struct UnderperformingRow<'a> {
    ip: &'a str,
    miner_type: &'a str,
    rate_avg: String,
    rate_ideal: String,
    rated: String,
    difference: String,
}

/// Returns the number of data rows.
pub fn write_underperforming<W: Write>(
    out: W,
    underperformers: &[Underperformer],
) -> Result<usize, csv::Error> {
    let mut writer = csv_writer(out)?;
    writer.write_record(UNDERPERFORMING_HEADER)?;
    for u in underperformers {
        writer.serialize(UnderperformingRow {
            ip: &u.ip,
            miner_type: &u.miner_type,
            rate_avg: TeraHashes(u.rate_avg).to_string(),
            rate_ideal: TeraHashes(u.rate_ideal).to_string(),
            rated: TeraHashes(u.rated).to_string(),
            difference: TeraHashes(u.difference()).to_string(),
        })?;
    }
    writer.flush()?;
    Ok(underperformers.len())
}
