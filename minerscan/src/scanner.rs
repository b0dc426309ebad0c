//! Fleet scanning.
//!
//! A pass takes the device list, probes every addressable device under a
//! concurrency cap, decodes what comes back and appends a snapshot per
//! success. Each device runs in its own task. A device's failure is
//! logged and counted, never propagated: the pass always runs to
//! completion and returns a [`ScanSummary`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strum::Display;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::model::{Device, SnapshotId, TelemetrySnapshot};
use crate::probe::{DeviceProber, ProbeError};
use crate::store::{SnapshotStore, StoreError};
use crate::telemetry::{self, DecodeError};
use crate::tracing::prelude::*;

/// Devices probed at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Why a device produced no snapshot in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    AddressUnresolved,
    ProbeTimeout,
    ProbeConnectionFailed,
    ProbeAllEndpointsFailed,
    DecodeMalformed,
    DecodeNoStats,
    PersistFailed,
    Cancelled,
    Panicked,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to persist snapshot: {0}")]
    Persist(#[from] StoreError),

    #[error("device task panicked")]
    Panicked,
}

impl ScanError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScanError::Probe(e) => probe_failure_kind(e),
            ScanError::Decode(DecodeError::Malformed(_)) => FailureKind::DecodeMalformed,
            ScanError::Decode(DecodeError::NoStats) => FailureKind::DecodeNoStats,
            ScanError::Persist(_) => FailureKind::PersistFailed,
            ScanError::Panicked => FailureKind::Panicked,
        }
    }
}

/// Exhausted endpoints are classified by the last attempt's cause, so a
/// device that is simply off shows up as a timeout or connection failure
/// rather than a generic exhaustion.
fn probe_failure_kind(err: &ProbeError) -> FailureKind {
    match err {
        ProbeError::NoAddress => FailureKind::AddressUnresolved,
        ProbeError::Timeout => FailureKind::ProbeTimeout,
        ProbeError::Connection(_) => FailureKind::ProbeConnectionFailed,
        ProbeError::Cancelled => FailureKind::Cancelled,
        ProbeError::AllEndpointsFailed { last, .. } => match probe_failure_kind(last) {
            kind @ (FailureKind::ProbeTimeout
            | FailureKind::ProbeConnectionFailed
            | FailureKind::Cancelled) => kind,
            _ => FailureKind::ProbeAllEndpointsFailed,
        },
        ProbeError::NoEndpoints
        | ProbeError::InvalidUrl { .. }
        | ProbeError::Status(_)
        | ProbeError::Auth(_) => FailureKind::ProbeAllEndpointsFailed,
    }
}

/// Result of scanning one device.
#[derive(Debug)]
pub struct ScanOutcome {
    pub device_id: String,
    pub result: Result<SnapshotId, ScanError>,
}

/// Counts for one pass.
///
/// `considered == skipped + succeeded + failed` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub considered: usize,
    /// Devices without an address; never probed.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: BTreeMap<FailureKind, usize>,
}

impl ScanSummary {
    fn record_failure(&mut self, kind: FailureKind) {
        self.failed += 1;
        *self.failures.entry(kind).or_default() += 1;
    }

    fn record(&mut self, outcome: &ScanOutcome) {
        match &outcome.result {
            Ok(_) => self.succeeded += 1,
            Err(e) => self.record_failure(e.kind()),
        }
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures.get(&kind).copied().unwrap_or(0)
    }
}

/// Runs scan passes over a fleet.
pub struct FleetScanner<P, S> {
    prober: Arc<P>,
    store: Arc<S>,
    concurrency: usize,
    pass_deadline: Option<Duration>,
}

impl<P, S> FleetScanner<P, S>
where
    P: DeviceProber + 'static,
    S: SnapshotStore + 'static,
{
    /// `concurrency` is clamped to at least 1.
    pub fn new(prober: Arc<P>, store: Arc<S>, concurrency: usize) -> Self {
        Self {
            prober,
            store,
            concurrency: concurrency.max(1),
            pass_deadline: None,
        }
    }

    /// Cancel any pass still running after `deadline`.
    pub fn with_pass_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.pass_deadline = deadline;
        self
    }

    /// Scan every device once and wait for all admitted scans to finish.
    ///
    /// Cancelling `cancel` aborts in-flight probes and stops admitting
    /// new devices; both are counted as [`FailureKind::Cancelled`].
    pub async fn scan_fleet(&self, devices: Vec<Device>, cancel: &CancellationToken) -> ScanSummary {
        let started = Instant::now();
        let pass = cancel.child_token();

        let _deadline = self.pass_deadline.map(|deadline| {
            let pass = pass.clone();
            AbortOnDropHandle::new(tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(deadline_secs = deadline.as_secs_f64(), "Scan pass deadline reached, cancelling");
                pass.cancel();
            }))
        });

        info!(
            devices = devices.len(),
            concurrency = self.concurrency,
            "Starting scan pass"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut summary = ScanSummary::default();

        for device in devices {
            summary.considered += 1;

            if device.address().is_none() {
                debug!(device = %device.device_id, "No address, skipping");
                summary.skipped += 1;
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = pass.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                debug!(device = %device.device_id, "Pass cancelled before device was admitted");
                summary.record_failure(FailureKind::Cancelled);
                continue;
            };

            let prober = self.prober.clone();
            let store = self.store.clone();
            let cancel = pass.clone();
            let span = info_span!("device", id = %device.device_id, ip = %device.ip);

            tasks.spawn(
                async move {
                    // Held until the task ends, however it ends.
                    let _permit = permit;
                    let result = scan_device(prober.as_ref(), store.as_ref(), &device, &cancel).await;
                    log_outcome(&result);
                    ScanOutcome {
                        device_id: device.device_id,
                        result,
                    }
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    error!(error = %e, "Device scan task failed");
                    summary.record_failure(ScanError::Panicked.kind());
                }
            }
        }

        info!(
            considered = summary.considered,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan pass complete"
        );
        for (kind, count) in &summary.failures {
            info!(%kind, count, "Scan failures");
        }

        summary
    }
}

/// Probe, decode and persist one device.
async fn scan_device<P, S>(
    prober: &P,
    store: &S,
    device: &Device,
    cancel: &CancellationToken,
) -> Result<SnapshotId, ScanError>
where
    P: DeviceProber + ?Sized,
    S: SnapshotStore + ?Sized,
{
    let body = prober.probe(device, cancel).await?;
    let reading = telemetry::decode(&body)?;
    let snapshot = TelemetrySnapshot::new(device, reading, OffsetDateTime::now_utc());
    Ok(store.save(snapshot).await?)
}

fn log_outcome(result: &Result<SnapshotId, ScanError>) {
    match result {
        Ok(id) => debug!(snapshot = id, "Snapshot saved"),
        Err(e) => match e.kind() {
            FailureKind::Cancelled => debug!("Scan cancelled"),
            FailureKind::PersistFailed => error!(error = %e, "Scan failed"),
            kind => warn!(%kind, error = %e, "Scan failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use test_case::test_case;

    use super::*;
    use crate::store::MemoryStore;

    const GOOD_PAYLOAD: &str = r#"{
        "INFO": {"type": "Antminer S19 XP+ Hyd."},
        "STATS": [{"rate_avg": 306230.0, "rate_unit": "GH/s"}]
    }"#;

    /// Prober whose behavior is picked by device id prefix, recording how
    /// many probes are in flight at once.
    #[derive(Default)]
    struct FakeProber {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DeviceProber for FakeProber {
        async fn probe(&self, device: &Device, cancel: &CancellationToken) -> Result<Bytes, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(ProbeError::Cancelled),
                result = respond(device, self.delay) => result,
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    async fn respond(device: &Device, delay: Duration) -> Result<Bytes, ProbeError> {
        let id = device.device_id.as_str();
        if id.starts_with("hang") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(delay).await;

        if id.starts_with("ok") {
            Ok(Bytes::from_static(GOOD_PAYLOAD.as_bytes()))
        } else if id.starts_with("timeout") {
            Err(ProbeError::Timeout)
        } else if id.starts_with("refused") {
            Err(ProbeError::AllEndpointsFailed {
                attempts: 2,
                last: Box::new(ProbeError::Connection("connection refused".into())),
            })
        } else if id.starts_with("malformed") {
            Ok(Bytes::from_static(b"<html>not json</html>"))
        } else if id.starts_with("empty") {
            Ok(Bytes::from_static(br#"{"INFO":{},"STATS":[]}"#))
        } else if id.starts_with("panic") {
            panic!("prober exploded");
        } else {
            Err(ProbeError::Status(404))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SnapshotStore for BrokenStore {
        async fn save(&self, _: TelemetrySnapshot) -> Result<SnapshotId, StoreError> {
            Err(StoreError::Corrupt {
                column: "snapshots",
                reason: "disk full".into(),
            })
        }

        async fn find_latest_by_device_id(&self, _: &str) -> Result<Option<TelemetrySnapshot>, StoreError> {
            Ok(None)
        }

        async fn find_snapshots_by_device_id(&self, _: &str) -> Result<Vec<TelemetrySnapshot>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn device(id: &str) -> Device {
        Device::new(id, "172.16.0.1")
    }

    fn assert_balanced(summary: &ScanSummary) {
        assert_eq!(
            summary.considered,
            summary.skipped + summary.succeeded + summary.failed
        );
        assert_eq!(summary.failed, summary.failures.values().sum::<usize>());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_is_never_exceeded() {
        let prober = Arc::new(FakeProber::with_delay(Duration::from_millis(100)));
        let store = Arc::new(MemoryStore::new());
        let scanner = FleetScanner::new(prober.clone(), store.clone(), DEFAULT_CONCURRENCY);

        let devices = (0..200).map(|i| device(&format!("ok-{i}"))).collect();
        let summary = scanner.scan_fleet(devices, &CancellationToken::new()).await;

        assert_eq!(summary.succeeded, 200);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 200);
        assert_eq!(prober.max_in_flight.load(Ordering::SeqCst), DEFAULT_CONCURRENCY);
        assert_eq!(store.snapshot_count(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn small_cap_serializes_probes() {
        let prober = Arc::new(FakeProber::with_delay(Duration::from_millis(10)));
        let scanner = FleetScanner::new(prober.clone(), Arc::new(MemoryStore::new()), 1);

        let devices = (0..5).map(|i| device(&format!("ok-{i}"))).collect();
        scanner.scan_fleet(devices, &CancellationToken::new()).await;

        assert_eq!(prober.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_counted() {
        let store = Arc::new(MemoryStore::new());
        let scanner = FleetScanner::new(Arc::new(FakeProber::default()), store.clone(), 4);

        let devices = vec![
            device("ok-1"),
            device("timeout-2"),
            device("malformed-3"),
            device("empty-4"),
            device("refused-5"),
            device("notfound-6"),
            device("ok-7"),
            Device::new("bad", ""),
        ];
        let summary = scanner.scan_fleet(devices, &CancellationToken::new()).await;

        assert_balanced(&summary);
        assert_eq!(summary.considered, 8);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 5);
        assert_eq!(summary.failures_of(FailureKind::ProbeTimeout), 1);
        assert_eq!(summary.failures_of(FailureKind::DecodeMalformed), 1);
        assert_eq!(summary.failures_of(FailureKind::DecodeNoStats), 1);
        assert_eq!(summary.failures_of(FailureKind::ProbeConnectionFailed), 1);
        assert_eq!(summary.failures_of(FailureKind::ProbeAllEndpointsFailed), 1);

        let saved = store.find_latest_by_device_id("ok-1").await.unwrap().unwrap();
        assert_eq!(saved.reading.miner_type, "Antminer S19 XP+ Hyd.");
        assert!(store.find_latest_by_device_id("ok-7").await.unwrap().is_some());
        assert!(store.find_latest_by_device_id("empty-4").await.unwrap().is_none());
        assert_eq!(store.snapshot_count(), 2);
    }

    #[tokio::test]
    async fn device_without_address_is_skipped_not_probed() {
        let prober = Arc::new(FakeProber::default());
        let store = Arc::new(MemoryStore::new());
        let scanner = FleetScanner::new(prober.clone(), store.clone(), DEFAULT_CONCURRENCY);

        let devices = vec![
            Device::new("ok-10x5", "172.16.10.5"),
            Device::new("bad", ""),
        ];
        let summary = scanner.scan_fleet(devices, &CancellationToken::new()).await;

        assert_eq!(summary.considered, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_passes_append_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let scanner = FleetScanner::new(Arc::new(FakeProber::default()), store.clone(), 8);

        let devices: Vec<Device> = (0..3).map(|i| device(&format!("ok-{i}"))).collect();
        scanner.scan_fleet(devices.clone(), &CancellationToken::new()).await;
        scanner.scan_fleet(devices, &CancellationToken::new()).await;

        for i in 0..3 {
            let history = store
                .find_snapshots_by_device_id(&format!("ok-{i}"))
                .await
                .unwrap();
            assert_eq!(history.len(), 2);
        }
    }

    #[tokio::test]
    async fn persist_failure_is_counted() {
        let scanner = FleetScanner::new(Arc::new(FakeProber::default()), Arc::new(BrokenStore), 2);

        let summary = scanner
            .scan_fleet(vec![device("ok-1"), device("ok-2")], &CancellationToken::new())
            .await;

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures_of(FailureKind::PersistFailed), 2);
    }

    #[tokio::test]
    async fn panicking_task_releases_its_permit() {
        let store = Arc::new(MemoryStore::new());
        let scanner = FleetScanner::new(Arc::new(FakeProber::default()), store.clone(), 1);

        let devices = vec![device("panic-1"), device("ok-2"), device("ok-3")];
        let summary = scanner.scan_fleet(devices, &CancellationToken::new()).await;

        assert_balanced(&summary);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failures_of(FailureKind::Panicked), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_pass() {
        let prober = Arc::new(FakeProber::default());
        let scanner = FleetScanner::new(prober.clone(), Arc::new(MemoryStore::new()), 2);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let devices = (0..5).map(|i| device(&format!("hang-{i}"))).collect();
        let summary = scanner.scan_fleet(devices, &cancel).await;

        assert_balanced(&summary);
        assert_eq!(summary.failed, 5);
        assert_eq!(summary.failures_of(FailureKind::Cancelled), 5);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pass_deadline_cancels_stragglers() {
        let store = Arc::new(MemoryStore::new());
        let scanner = FleetScanner::new(Arc::new(FakeProber::default()), store.clone(), 4)
            .with_pass_deadline(Some(Duration::from_secs(30)));

        let devices = vec![device("ok-1"), device("hang-2"), device("ok-3")];
        let summary = scanner.scan_fleet(devices, &CancellationToken::new()).await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failures_of(FailureKind::Cancelled), 1);
        assert_eq!(store.snapshot_count(), 2);
    }

    #[test_case(ProbeError::Timeout, FailureKind::ProbeTimeout)]
    #[test_case(ProbeError::Connection("refused".into()), FailureKind::ProbeConnectionFailed)]
    #[test_case(ProbeError::Status(500), FailureKind::ProbeAllEndpointsFailed)]
    #[test_case(ProbeError::Cancelled, FailureKind::Cancelled)]
    #[test_case(ProbeError::NoAddress, FailureKind::AddressUnresolved)]
    #[test_case(
        ProbeError::AllEndpointsFailed { attempts: 2, last: Box::new(ProbeError::Timeout) },
        FailureKind::ProbeTimeout ; "exhausted after timeout"
    )]
    #[test_case(
        ProbeError::AllEndpointsFailed { attempts: 2, last: Box::new(ProbeError::Status(404)) },
        FailureKind::ProbeAllEndpointsFailed ; "exhausted after 404"
    )]
    #[test_case(
        ProbeError::AllEndpointsFailed { attempts: 1, last: Box::new(ProbeError::Auth("rejected".into())) },
        FailureKind::ProbeAllEndpointsFailed ; "exhausted after auth"
    )]
    fn probe_errors_are_classified(err: ProbeError, expected: FailureKind) {
        assert_eq!(ScanError::from(err).kind(), expected);
    }

    #[test]
    fn failure_kinds_display_in_snake_case() {
        assert_eq!(FailureKind::ProbeAllEndpointsFailed.to_string(), "probe_all_endpoints_failed");
        assert_eq!(FailureKind::DecodeNoStats.to_string(), "decode_no_stats");
    }
}
