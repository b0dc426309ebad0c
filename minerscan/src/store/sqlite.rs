//! SQLite-backed store.
//!
//! rusqlite is blocking, so every call runs on the blocking pool with the
//! connection behind a mutex. Scan passes save from many tasks at once;
//! they simply queue on the mutex.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{DeviceStore, SnapshotStore, StoreError};
use crate::model::{
    ChainReading, Device, PoolHashRate, SnapshotId, TelemetryReading, TelemetrySnapshot,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS devices (
        device_id            TEXT PRIMARY KEY,
        ip                   TEXT NOT NULL,
        user_worker_id       TEXT NOT NULL,
        status               INTEGER NOT NULL,
        hs_last_10min        REAL NOT NULL,
        hs_last_10min_unit   TEXT NOT NULL,
        hs_last_1h           REAL NOT NULL,
        hs_last_1h_unit      TEXT NOT NULL,
        hs_last_1d           REAL NOT NULL,
        hs_last_1d_unit      TEXT NOT NULL,
        reject_ratio         TEXT NOT NULL,
        online_time_last_24h REAL NOT NULL,
        created_at           TEXT NOT NULL,
        updated_at           TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS snapshots (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id     TEXT NOT NULL,
        ip            TEXT NOT NULL,
        miner_type    TEXT NOT NULL,
        miner_version TEXT NOT NULL,
        compile_time  TEXT NOT NULL,
        elapsed_secs  INTEGER NOT NULL,
        rate_5s       REAL NOT NULL,
        rate_30m      REAL NOT NULL,
        rate_avg      REAL NOT NULL,
        rate_ideal    REAL NOT NULL,
        rate_unit     TEXT NOT NULL,
        fan_count     INTEGER NOT NULL,
        hwp_total     REAL NOT NULL,
        captured_at   TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_snapshots_device_latest
        ON snapshots(device_id, id DESC);

    CREATE TABLE IF NOT EXISTS chains (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id  INTEGER NOT NULL REFERENCES snapshots(id),
        position     INTEGER NOT NULL,
        chain_index  INTEGER NOT NULL,
        freq_avg     REAL NOT NULL,
        rate_ideal   REAL NOT NULL,
        rate_real    REAL NOT NULL,
        asic_count   INTEGER NOT NULL,
        hw_errors    INTEGER NOT NULL,
        hw_error_pct REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chains_snapshot
        ON chains(snapshot_id, position);
"#;

const DEVICE_COLUMNS: &str = "device_id, ip, user_worker_id, status, \
    hs_last_10min, hs_last_10min_unit, hs_last_1h, hs_last_1h_unit, \
    hs_last_1d, hs_last_1d_unit, reject_ratio, online_time_last_24h, \
    created_at, updated_at";

const SNAPSHOT_COLUMNS: &str = "id, device_id, ip, miner_type, miner_version, \
    compile_time, elapsed_secs, rate_5s, rate_30m, rate_avg, rate_ideal, \
    rate_unit, fan_count, hwp_total, captured_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database file, enabling WAL and creating tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn save_devices_batch(&self, devices: &[Device]) -> Result<(), StoreError> {
        let devices = devices.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO devices ({DEVICE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                     ON CONFLICT(device_id) DO UPDATE SET
                        ip = excluded.ip,
                        user_worker_id = excluded.user_worker_id,
                        status = excluded.status,
                        hs_last_10min = excluded.hs_last_10min,
                        hs_last_10min_unit = excluded.hs_last_10min_unit,
                        hs_last_1h = excluded.hs_last_1h,
                        hs_last_1h_unit = excluded.hs_last_1h_unit,
                        hs_last_1d = excluded.hs_last_1d,
                        hs_last_1d_unit = excluded.hs_last_1d_unit,
                        reject_ratio = excluded.reject_ratio,
                        online_time_last_24h = excluded.online_time_last_24h,
                        created_at = excluded.created_at,
                        updated_at = excluded.updated_at"
                ))?;

                for d in &devices {
                    stmt.execute(params![
                        d.device_id,
                        d.ip,
                        d.user_worker_id,
                        d.status,
                        d.hs_last_10min.value,
                        d.hs_last_10min.unit,
                        d.hs_last_1h.value,
                        d.hs_last_1h.unit,
                        d.hs_last_1d.value,
                        d.hs_last_1d.unit,
                        d.reject_ratio,
                        d.online_time_last_24h,
                        format_time(d.created_at)?,
                        format_time(d.updated_at)?,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_all_devices(&self) -> Result<Vec<Device>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY device_id"
            ))?;
            let rows = stmt.query_map([], DeviceRow::from_row)?;
            rows.map(|row| row?.into_device()).collect()
        })
        .await
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?1"),
                params![device_id],
                DeviceRow::from_row,
            )
            .optional()?
            .map(DeviceRow::into_device)
            .transpose()
        })
        .await
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn save(&self, snapshot: TelemetrySnapshot) -> Result<SnapshotId, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let r = &snapshot.reading;
            tx.execute(
                "INSERT INTO snapshots (device_id, ip, miner_type, miner_version,
                    compile_time, elapsed_secs, rate_5s, rate_30m, rate_avg, rate_ideal,
                    rate_unit, fan_count, hwp_total, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    snapshot.device_id,
                    snapshot.ip,
                    r.miner_type,
                    r.miner_version,
                    r.compile_time,
                    r.elapsed_secs,
                    r.rate_5s,
                    r.rate_30m,
                    r.rate_avg,
                    r.rate_ideal,
                    r.rate_unit,
                    r.fan_count,
                    r.hwp_total,
                    format_time(snapshot.captured_at)?,
                ],
            )?;
            let id = tx.last_insert_rowid();

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chains (snapshot_id, position, chain_index, freq_avg,
                        rate_ideal, rate_real, asic_count, hw_errors, hw_error_pct)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for (position, c) in r.chains.iter().enumerate() {
                    stmt.execute(params![
                        id,
                        position as i64,
                        c.index,
                        c.freq_avg,
                        c.rate_ideal,
                        c.rate_real,
                        c.asic_count,
                        c.hw_errors,
                        c.hw_error_pct,
                    ])?;
                }
            }

            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn find_latest_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<TelemetrySnapshot>, StoreError> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                         WHERE device_id = ?1 ORDER BY id DESC LIMIT 1"
                    ),
                    params![device_id],
                    SnapshotRow::from_row,
                )
                .optional()?;

            row.map(|row| row.into_snapshot(conn)).transpose()
        })
        .await
    }

    async fn find_snapshots_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Vec<TelemetrySnapshot>, StoreError> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let rows = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                     WHERE device_id = ?1 ORDER BY id ASC"
                ))?;
                stmt.query_map(params![device_id], SnapshotRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            };

            rows.into_iter()
                .map(|row| row.into_snapshot(conn))
                .collect()
        })
        .await
    }
}

fn format_time(at: OffsetDateTime) -> Result<String, StoreError> {
    at.format(&Rfc3339).map_err(|e| StoreError::Corrupt {
        column: "timestamp",
        reason: e.to_string(),
    })
}

fn parse_time(column: &'static str, text: &str) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::parse(text, &Rfc3339).map_err(|e| StoreError::Corrupt {
        column,
        reason: format!("{text:?}: {e}"),
    })
}

/// Raw `devices` row; timestamps still text.
struct DeviceRow {
    device: Device,
    created_at: String,
    updated_at: String,
}

impl DeviceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            device: Device {
                device_id: row.get(0)?,
                ip: row.get(1)?,
                user_worker_id: row.get(2)?,
                status: row.get(3)?,
                hs_last_10min: PoolHashRate::new(row.get(4)?, row.get::<_, String>(5)?),
                hs_last_1h: PoolHashRate::new(row.get(6)?, row.get::<_, String>(7)?),
                hs_last_1d: PoolHashRate::new(row.get(8)?, row.get::<_, String>(9)?),
                reject_ratio: row.get(10)?,
                online_time_last_24h: row.get(11)?,
                created_at: OffsetDateTime::UNIX_EPOCH,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            },
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_device(self) -> Result<Device, StoreError> {
        Ok(Device {
            created_at: parse_time("devices.created_at", &self.created_at)?,
            updated_at: parse_time("devices.updated_at", &self.updated_at)?,
            ..self.device
        })
    }
}

/// Raw `snapshots` row; chains are loaded separately.
struct SnapshotRow {
    id: SnapshotId,
    device_id: String,
    ip: String,
    reading: TelemetryReading,
    captured_at: String,
}

impl SnapshotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            ip: row.get(2)?,
            reading: TelemetryReading {
                miner_type: row.get(3)?,
                miner_version: row.get(4)?,
                compile_time: row.get(5)?,
                elapsed_secs: row.get(6)?,
                rate_5s: row.get(7)?,
                rate_30m: row.get(8)?,
                rate_avg: row.get(9)?,
                rate_ideal: row.get(10)?,
                rate_unit: row.get(11)?,
                fan_count: row.get(12)?,
                hwp_total: row.get(13)?,
                chains: Vec::new(),
            },
            captured_at: row.get(14)?,
        })
    }

    fn into_snapshot(self, conn: &Connection) -> Result<TelemetrySnapshot, StoreError> {
        let mut stmt = conn.prepare_cached(
            "SELECT chain_index, freq_avg, rate_ideal, rate_real, asic_count,
                    hw_errors, hw_error_pct
             FROM chains WHERE snapshot_id = ?1 ORDER BY position",
        )?;
        let chains = stmt
            .query_map(params![self.id], |row| {
                Ok(ChainReading {
                    index: row.get(0)?,
                    freq_avg: row.get(1)?,
                    rate_ideal: row.get(2)?,
                    rate_real: row.get(3)?,
                    asic_count: row.get(4)?,
                    hw_errors: row.get(5)?,
                    hw_error_pct: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TelemetrySnapshot {
            device_id: self.device_id,
            ip: self.ip,
            captured_at: parse_time("snapshots.captured_at", &self.captured_at)?,
            reading: TelemetryReading {
                chains,
                ..self.reading
            },
        })
    }
}
