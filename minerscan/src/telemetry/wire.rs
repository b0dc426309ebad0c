//! Serde mirror of the Antminer `stats.cgi` payload.
//!
//! Only the fields the crate stores are declared; serde skips the rest.
//! Every scalar goes through one of the `lenient_*` helpers so that
//! missing, `null` and quoted-number values are handled the same way on
//! every firmware.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
pub(super) struct StatsResponse {
    #[serde(rename = "INFO", default)]
    pub info: Option<Info>,
    #[serde(rename = "STATS", default)]
    pub stats: Option<Vec<StatsItem>>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct Info {
    #[serde(default, deserialize_with = "lenient_string")]
    pub miner_version: String,
    #[serde(rename = "CompileTime", default, deserialize_with = "lenient_string")]
    pub compile_time: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub miner_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct StatsItem {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub elapsed: i64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rate_5s: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rate_30m: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rate_avg: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rate_ideal: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rate_unit: String,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub fan_num: i32,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hwp_total: f64,
    #[serde(default)]
    pub chain: Option<Vec<ChainItem>>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChainItem {
    #[serde(default, deserialize_with = "lenient_i32")]
    pub index: i32,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub freq_avg: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rate_ideal: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rate_real: f64,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub asic_num: i32,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub hw: i64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hwp: f64,
}

/// Number, numeric string, or null (0.0). Anything else is an error.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom(format!("number out of range: {n}"))),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(0.0)
            } else {
                s.parse()
                    .map_err(|_| de::Error::custom(format!("not a number: {s:?}")))
            }
        }
        Some(other) => Err(de::Error::custom(format!("expected number, got {other}"))),
    }
}

/// Whole number, sign allowed. Firmware reports `-1` for counters it
/// does not track.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_f64(deserializer)?;
    if value.fract() != 0.0 || value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return Err(de::Error::custom(format!("expected integer, got {value}")));
    }
    Ok(value as i64)
}

fn lenient_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_i64(deserializer)?;
    i32::try_from(value).map_err(|_| de::Error::custom(format!("integer out of range: {value}")))
}

/// String, number (formatted), or null (""). Anything else is an error.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(de::Error::custom(format!("expected string, got {other}"))),
    }
}
