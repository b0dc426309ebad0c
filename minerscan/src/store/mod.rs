//! Persistence for devices and telemetry snapshots.
//!
//! Devices are upserted on `device_id`. Snapshots are append-only: every
//! save inserts a new row, and "latest" means the most recently inserted
//! snapshot for a device.

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Device, SnapshotId, TelemetrySnapshot};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid stored value in {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or update each device, keyed on `device_id`.
    async fn save_devices_batch(&self, devices: &[Device]) -> Result<(), StoreError>;

    async fn find_all_devices(&self) -> Result<Vec<Device>, StoreError>;

    async fn find_device(&self, device_id: &str) -> Result<Option<Device>, StoreError>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot. Never replaces an earlier one.
    async fn save(&self, snapshot: TelemetrySnapshot) -> Result<SnapshotId, StoreError>;

    /// Most recently saved snapshot for the device, if any.
    async fn find_latest_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<TelemetrySnapshot>, StoreError>;

    /// Every snapshot for the device, oldest first.
    async fn find_snapshots_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Vec<TelemetrySnapshot>, StoreError>;
}
