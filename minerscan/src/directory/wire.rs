//! Serde mirror of the pool observer worker-list response.

use serde::Deserialize;
use serde_json::Value;

/// Codes the API uses for success. Current deployments send the string
/// "000000"; older ones sent 0.
const SUCCESS_CODES: [&str; 2] = ["000000", "0"];

#[derive(Debug, Deserialize)]
pub(super) struct ListResponse {
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<WorkerPage>,
}

impl ListResponse {
    pub fn code(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        SUCCESS_CODES.contains(&self.code().as_str())
    }
}

/// One page of workers.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPage {
    #[serde(default)]
    pub items: Vec<WorkerItem>,
    #[serde(default)]
    pub page_num: u32,
    #[serde(default)]
    pub total_page: u32,
    #[serde(default)]
    pub total_record: u64,
}

/// A worker as the pool reports it. Hashrates are "value unit" strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerItem {
    pub worker_id: String,
    pub user_worker_id: String,
    pub worker_status: i32,
    #[serde(rename = "hsLast10Min")]
    pub hs_last_10min: String,
    #[serde(rename = "hsLast1H")]
    pub hs_last_1h: String,
    #[serde(rename = "hsLast1D")]
    pub hs_last_1d: String,
    pub reject_ratio: String,
    #[serde(rename = "onlineTimeLast24h")]
    pub online_time_last_24h: f64,
    /// Milliseconds since the epoch.
    pub create_time: i64,
}
