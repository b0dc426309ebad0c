//! Command-line interface for minerscan.
//!
//! Each subcommand is one job: sync the device directory, scan the
//! fleet, or export a report. Configuration is loaded once here and
//! handed to the library.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use minerscan::config::Config;
use minerscan::directory::DirectoryClient;
use minerscan::probe::{Credentials, HttpProber};
use minerscan::report;
use minerscan::scanner::FleetScanner;
use minerscan::store::{DeviceStore, SqliteStore};
use minerscan::tracing::prelude::*;

#[derive(Parser)]
#[command(name = "minerscan", version, about = "Poll a mining fleet for telemetry")]
struct Cli {
    /// TOML configuration file (default: ./minerscan.toml if present)
    #[arg(long, global = true, env = "MINERSCAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the worker list from the pool and update stored devices
    FetchWorkers,

    /// Probe every stored device and save a telemetry snapshot for each
    ScanMiners {
        /// Repeat the scan every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },

    /// Write the hashrate analysis CSV
    ExportAnalysis {
        /// Output directory (default: report.output_dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Write the CSV of miners below their rated hashrate
    ExportUnderperforming {
        /// Output directory (default: report.output_dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    minerscan::tracing::init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let store = Arc::new(
        SqliteStore::open(&config.database.path).with_context(|| {
            format!("Failed to open database {}", config.database.path.display())
        })?,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::FetchWorkers => fetch_workers(&config, store.as_ref(), &cancel).await,
        Command::ScanMiners { interval } => {
            scan_miners(&config, store, interval.map(Duration::from_secs), &cancel).await
        }
        Command::ExportAnalysis { out } => {
            let dir = out.unwrap_or_else(|| config.report.output_dir.clone());
            let path = report::export_analysis(store.as_ref(), &dir, now_local()).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::ExportUnderperforming { out } => {
            let dir = out.unwrap_or_else(|| config.report.output_dir.clone());
            let path = report::export_underperforming(store.as_ref(), &dir, now_local()).await?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

async fn fetch_workers(config: &Config, store: &SqliteStore, cancel: &CancellationToken) -> Result<()> {
    if config.directory.access_key.is_empty() {
        warn!("directory.access_key is empty; the pool will likely reject the request");
    }

    let client = DirectoryClient::new(config.directory.clone())?;
    let summary = client
        .sync(store, cancel)
        .await
        .context("Directory sync failed")?;

    println!(
        "Saved {} devices from {} pages ({} without an address)",
        summary.devices, summary.pages, summary.unaddressed
    );
    Ok(())
}

async fn scan_miners(
    config: &Config,
    store: Arc<SqliteStore>,
    interval: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<()> {
    let scan = &config.scan;
    let prober = HttpProber::new(
        scan.endpoints.clone(),
        Credentials::new(&scan.username, &scan.password),
        scan.probe_timeout(),
    )?;
    let scanner = FleetScanner::new(Arc::new(prober), store.clone(), scan.concurrency)
        .with_pass_deadline(scan.pass_deadline());

    loop {
        let devices = store.find_all_devices().await?;
        if devices.is_empty() {
            warn!("No devices stored; run fetch-workers first");
        }

        let summary = scanner.scan_fleet(devices, cancel).await;
        println!(
            "Scanned {}: {} ok, {} failed, {} skipped",
            summary.considered, summary.succeeded, summary.failed, summary.skipped
        );
        for (kind, count) in &summary.failures {
            println!("  {kind}: {count}");
        }

        let Some(interval) = interval else {
            return Ok(());
        };
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Report file names use local time when the offset is known.
fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
