use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeviceStore, SnapshotStore, StoreError};
use crate::model::{Device, SnapshotId, TelemetrySnapshot};

/// Process-local store with the same semantics as [`super::SqliteStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    devices: BTreeMap<String, Device>,
    snapshots: Vec<TelemetrySnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total snapshots saved across all devices.
    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().snapshots.len()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn save_devices_batch(&self, devices: &[Device]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for device in devices {
            inner
                .devices
                .insert(device.device_id.clone(), device.clone());
        }
        Ok(())
    }

    async fn find_all_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.inner.lock().devices.values().cloned().collect())
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.inner.lock().devices.get(device_id).cloned())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, snapshot: TelemetrySnapshot) -> Result<SnapshotId, StoreError> {
        let mut inner = self.inner.lock();
        inner.snapshots.push(snapshot);
        Ok(inner.snapshots.len() as SnapshotId)
    }

    async fn find_latest_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<TelemetrySnapshot>, StoreError> {
        Ok(self
            .inner
            .lock()
            .snapshots
            .iter()
            .rev()
            .find(|s| s.device_id == device_id)
            .cloned())
    }

    async fn find_snapshots_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Vec<TelemetrySnapshot>, StoreError> {
        Ok(self
            .inner
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect())
    }
}
