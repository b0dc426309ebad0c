use std::io::Write;

use serde::Serialize;

use super::{FleetEntry, csv_writer};
use crate::types::TeraHashes;

pub const ANALYSIS_HEADER: [&str; 8] = [
    "IP",
    "Miner Type",
    "Rate Avg (TH/s)",
    "Rate Ideal (TH/s)",
    "Hs Last 1D (TH/s)",
    "Reject Ratio",
    "Worker Status",
    "Online Time Last 24h",
];

#[derive(Serialize)]
struct AnalysisRow<'a> {
    ip: &'a str,
    miner_type: &'a str,
    rate_avg: String,
    rate_ideal: String,
    hs_last_1d: String,
    reject_ratio: &'a str,
    worker_status: i32,
    online_time_last_24h: String,
}

impl<'a> AnalysisRow<'a> {
    fn new(entry: &'a FleetEntry) -> Self {
        let device = &entry.device;
        let (miner_type, rate_avg, rate_ideal) = match &entry.latest {
            Some(snapshot) => (
                snapshot.reading.miner_type.as_str(),
                snapshot.reading.rate_avg_terahashes(),
                snapshot.reading.rate_ideal_terahashes(),
            ),
            None => ("", 0.0, 0.0),
        };

        Self {
            ip: &device.ip,
            miner_type,
            rate_avg: TeraHashes(rate_avg).to_string(),
            rate_ideal: TeraHashes(rate_ideal).to_string(),
            hs_last_1d: TeraHashes(device.hs_last_1d.terahashes()).to_string(),
            reject_ratio: &device.reject_ratio,
            worker_status: device.status,
            online_time_last_24h: format!("{:.2}", device.online_time_last_24h),
        }
    }
}

/// One row per device. Devices never scanned get an empty type and zero
/// rates. Returns the number of data rows.
pub fn write_analysis<W: Write>(out: W, entries: &[FleetEntry]) -> Result<usize, csv::Error> {
    let mut writer = csv_writer(out)?;
    writer.write_record(ANALYSIS_HEADER)?;
    for entry in entries {
        writer.serialize(AnalysisRow::new(entry))?;
    }
    writer.flush()?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::model::{Device, PoolHashRate, TelemetryReading, TelemetrySnapshot};
    use crate::report::UTF8_BOM;

    fn render(entries: &[FleetEntry]) -> String {
        let mut out = Vec::new();
        write_analysis(&mut out, entries).unwrap();
        assert!(out.starts_with(UTF8_BOM));
        String::from_utf8(out[UTF8_BOM.len()..].to_vec()).unwrap()
    }

    #[test]
    fn scanned_and_unscanned_devices() {
        let device = Device {
            hs_last_1d: PoolHashRate::new(290.456, "TH/s"),
            reject_ratio: "0.02%".into(),
            status: 1,
            online_time_last_24h: 0.987,
            ..Device::new("30x182", "172.16.30.182")
        };
        let reading = TelemetryReading {
            miner_type: "Antminer S19 XP+ Hyd.".into(),
            rate_avg: 306_230.0,
            rate_ideal: 293_000.0,
            rate_unit: "GH/s".into(),
            ..Default::default()
        };
        let scanned = FleetEntry {
            latest: Some(TelemetrySnapshot::new(&device, reading, OffsetDateTime::UNIX_EPOCH)),
            device,
        };
        let unscanned = FleetEntry {
            device: Device::new("bad", ""),
            latest: None,
        };

        let text = render(&[scanned, unscanned]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "IP,Miner Type,Rate Avg (TH/s),Rate Ideal (TH/s),Hs Last 1D (TH/s),Reject Ratio,Worker Status,Online Time Last 24h",
                "172.16.30.182,Antminer S19 XP+ Hyd.,306.23,293.00,290.46,0.02%,1,0.99",
                ",,0.00,0.00,0.00,,0,0.00",
            ]
        );
    }

    #[test]
    fn empty_fleet_still_has_header() {
        let text = render(&[]);
        assert_eq!(text.lines().count(), 1);
    }
}
