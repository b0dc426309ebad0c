use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::normalize;

/// First two octets of the private network the farm's devices live on.
pub const DEFAULT_ADDRESS_PREFIX: [u8; 2] = [172, 16];

/// A hashrate window as reported by the pool, in its own unit.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PoolHashRate {
    pub value: f64,
    pub unit: String,
}

impl PoolHashRate {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    /// Value in TH/s.
    pub fn terahashes(&self) -> f64 {
        normalize(self.value, &self.unit)
    }
}

/// A mining device known to the pool directory.
///
/// Upserted by directory sync, keyed on `device_id`. The scanner only
/// reads `device_id` and `ip`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Device {
    /// Pool-assigned worker id, e.g. "30x182".
    pub device_id: String,
    /// Management address; empty when it could not be derived.
    pub ip: String,
    pub user_worker_id: String,
    pub status: i32,
    pub hs_last_10min: PoolHashRate,
    pub hs_last_1h: PoolHashRate,
    pub hs_last_1d: PoolHashRate,
    /// Reject ratio exactly as the pool formats it (e.g. "0.12%").
    pub reject_ratio: String,
    /// Fraction of the last 24 hours the worker was online.
    pub online_time_last_24h: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Device {
    /// A device with only identity and address set.
    pub fn new(device_id: impl Into<String>, ip: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            device_id: device_id.into(),
            ip: ip.into(),
            user_worker_id: String::new(),
            status: 0,
            hs_last_10min: PoolHashRate::default(),
            hs_last_1h: PoolHashRate::default(),
            hs_last_1d: PoolHashRate::default(),
            reject_ratio: String::new(),
            online_time_last_24h: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The address to probe, or `None` if the device is not resolvable yet.
    pub fn address(&self) -> Option<&str> {
        let ip = self.ip.trim();
        (!ip.is_empty()).then_some(ip)
    }
}

/// Derive a device's LAN address from its pool id.
///
/// Ids have the form `<a>x<b>` where `a` and `b` are the last two octets
/// of the address under `prefix`: "30x182" becomes 172.16.30.182. Any
/// other shape yields `None`.
pub fn derive_address(device_id: &str, prefix: [u8; 2]) -> Option<Ipv4Addr> {
    let (a, b) = device_id.trim().split_once('x')?;
    let a: u8 = a.parse().ok()?;
    let b: u8 = b.parse().ok()?;
    Some(Ipv4Addr::new(prefix[0], prefix[1], a, b))
}
