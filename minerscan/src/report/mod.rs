//! CSV reports over the stored fleet.
//!
//! Both reports read every device and its latest snapshot, and write a
//! UTF-8 CSV with a byte-order mark so spreadsheet tools pick the right
//! encoding. Hashrates are in TH/s with two decimals.

mod analysis;
mod underperforming;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{Error, Result};
use crate::model::{Device, TelemetrySnapshot};
use crate::store::{DeviceStore, SnapshotStore, StoreError};
use crate::tracing::prelude::*;

pub use analysis::{ANALYSIS_HEADER, write_analysis};
pub use underperforming::{
    RATED_HASHRATES, UNDERPERFORMING_HEADER, Underperformer, find_underperformers, rated_hashrate,
    write_underperforming,
};

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub const ANALYSIS_PREFIX: &str = "hashrate_analysis";
pub const UNDERPERFORMING_PREFIX: &str = "underperforming_miners";

/// A device with its most recent snapshot, if it has one.
#[derive(Debug, Clone)]
pub struct FleetEntry {
    pub device: Device,
    pub latest: Option<TelemetrySnapshot>,
}

/// Read every device and its latest snapshot.
pub async fn load_fleet<S>(store: &S) -> std::result::Result<Vec<FleetEntry>, StoreError>
where
    S: DeviceStore + SnapshotStore + ?Sized,
{
    let devices = store.find_all_devices().await?;
    let mut entries = Vec::with_capacity(devices.len());
    for device in devices {
        let latest = store.find_latest_by_device_id(&device.device_id).await?;
        entries.push(FleetEntry { device, latest });
    }
    Ok(entries)
}

/// `<prefix>_YYYYmmdd_HHMMSS.csv`
pub fn report_file_name(prefix: &str, at: OffsetDateTime) -> String {
    let stamp = at
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .unwrap_or_default();
    format!("{prefix}_{stamp}.csv")
}

/// Write the hashrate analysis of the whole fleet into `dir`.
pub async fn export_analysis<S>(store: &S, dir: &Path, at: OffsetDateTime) -> Result<PathBuf>
where
    S: DeviceStore + SnapshotStore + ?Sized,
{
    let entries = load_fleet(store).await?;
    let path = dir.join(report_file_name(ANALYSIS_PREFIX, at));

    let rows = write_file(&path, |out| write_analysis(out, &entries))?;
    info!(file = %path.display(), rows, "Hashrate analysis exported");
    Ok(path)
}

/// Write the devices running below their rated hashrate into `dir`.
pub async fn export_underperforming<S>(store: &S, dir: &Path, at: OffsetDateTime) -> Result<PathBuf>
where
    S: DeviceStore + SnapshotStore + ?Sized,
{
    let entries = load_fleet(store).await?;
    let underperformers = find_underperformers(&entries);
    let path = dir.join(report_file_name(UNDERPERFORMING_PREFIX, at));

    let rows = write_file(&path, |out| write_underperforming(out, &underperformers))?;
    info!(
        file = %path.display(),
        devices = entries.len(),
        underperforming = rows,
        "Underperforming miners exported"
    );
    Ok(path)
}

fn write_file<F>(path: &Path, write: F) -> Result<usize>
where
    F: FnOnce(&mut BufWriter<File>) -> std::result::Result<usize, csv::Error>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    let rows = write(&mut out)?;
    out.flush().map_err(Error::Io)?;
    Ok(rows)
}

/// Start a CSV writer on `out`, after the byte-order mark.
fn csv_writer<W: Write>(mut out: W) -> std::result::Result<csv::Writer<W>, csv::Error> {
    out.write_all(UTF8_BOM)?;
    Ok(csv::WriterBuilder::new().has_headers(false).from_writer(out))
}
