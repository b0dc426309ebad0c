//! Fleet discovery from the pool's observer API.
//!
//! The pool lists every worker on the account, page by page. Each worker
//! becomes a [`Device`]; its LAN address is derived from the worker id.
//! A sync upserts each page as it arrives, so an interrupted sync leaves
//! the pages already fetched in the store.

mod wire;

use reqwest::header::{ACCEPT, CACHE_CONTROL, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::config::DirectoryConfig;
use crate::model::{Device, PoolHashRate, derive_address};
use crate::store::{DeviceStore, StoreError};
use crate::tracing::prelude::*;
use crate::types::parse_hashrate;

use wire::ListResponse;
pub use wire::{WorkerItem, WorkerPage};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {code}: {msg}")]
    Api { code: String, msg: String },

    #[error("invalid header value for {0}")]
    Header(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("directory sync cancelled")]
    Cancelled,
}

/// Totals for one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub pages: u32,
    pub devices: usize,
    /// Devices whose id did not yield an address.
    pub unaddressed: usize,
}

pub struct DirectoryClient {
    client: Client,
    config: DirectoryConfig,
}

impl DirectoryClient {
    pub fn new(config: DirectoryConfig) -> Result<Self, DirectoryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if !config.cookie.is_empty() {
            let mut cookie = HeaderValue::from_str(&config.cookie)
                .map_err(|_| DirectoryError::Header("cookie"))?;
            cookie.set_sensitive(true);
            headers.insert(COOKIE, cookie);
        }
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|_| DirectoryError::Header("user-agent"))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { client, config })
    }

    /// Fetch one page (1-based).
    pub async fn fetch_page(&self, page: u32) -> Result<WorkerPage, DirectoryError> {
        let page_num = page.to_string();
        let page_size = self.config.page_size.to_string();

        let response = self
            .client
            .get(&self.config.url)
            .query(&[
                ("search", ""),
                ("workerStatus", "0"),
                ("accessKey", self.config.access_key.as_str()),
                ("coinType", self.config.coin_type.as_str()),
                ("observerUserId", self.config.observer_user_id.as_str()),
                ("pageNum", page_num.as_str()),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(DirectoryError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let parsed: ListResponse = serde_json::from_slice(&body)?;

        if !parsed.is_success() {
            return Err(DirectoryError::Api {
                code: parsed.code(),
                msg: parsed.msg,
            });
        }

        Ok(parsed.data.unwrap_or_default())
    }

    /// Fetch every page and upsert the devices into `store`.
    ///
    /// Any error ends the sync. Pages already saved stay saved.
    pub async fn sync<S>(&self, store: &S, cancel: &CancellationToken) -> Result<SyncSummary, DirectoryError>
    where
        S: DeviceStore + ?Sized,
    {
        let mut summary = SyncSummary::default();
        let mut page = 1;

        info!(url = %self.config.url, page_size = self.config.page_size, "Syncing device directory");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DirectoryError::Cancelled),
                fetched = self.fetch_page(page) => fetched?,
            };

            let now = OffsetDateTime::now_utc();
            let devices: Vec<Device> = fetched
                .items
                .iter()
                .map(|item| device_from_item(item, self.config.address_prefix, now))
                .collect();

            let unaddressed = devices.iter().filter(|d| d.address().is_none()).count();
            for device in devices.iter().filter(|d| d.address().is_none()) {
                debug!(device = %device.device_id, "Worker id does not map to an address");
            }

            if !devices.is_empty() {
                store.save_devices_batch(&devices).await?;
            }

            summary.pages += 1;
            summary.devices += devices.len();
            summary.unaddressed += unaddressed;

            info!(
                page,
                total_pages = fetched.total_page,
                saved = devices.len(),
                "Saved directory page"
            );

            if devices.is_empty() || page >= fetched.total_page {
                break;
            }
            page += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DirectoryError::Cancelled),
                _ = tokio::time::sleep(self.config.page_delay()) => {}
            }
        }

        info!(
            pages = summary.pages,
            devices = summary.devices,
            unaddressed = summary.unaddressed,
            "Directory sync complete"
        );
        Ok(summary)
    }
}

/// Build a device from a directory entry.
pub fn device_from_item(item: &WorkerItem, prefix: [u8; 2], now: OffsetDateTime) -> Device {
    let ip = derive_address(&item.worker_id, prefix)
        .map(|addr| addr.to_string())
        .unwrap_or_default();

    Device {
        device_id: item.worker_id.clone(),
        ip,
        user_worker_id: item.user_worker_id.clone(),
        status: item.worker_status,
        hs_last_10min: pool_rate(&item.hs_last_10min),
        hs_last_1h: pool_rate(&item.hs_last_1h),
        hs_last_1d: pool_rate(&item.hs_last_1d),
        reject_ratio: item.reject_ratio.clone(),
        online_time_last_24h: item.online_time_last_24h,
        created_at: from_millis(item.create_time).unwrap_or(now),
        updated_at: now,
    }
}

fn pool_rate(text: &str) -> PoolHashRate {
    let (value, unit) = parse_hashrate(text);
    PoolHashRate::new(value, unit)
}

fn from_millis(millis: i64) -> Option<OffsetDateTime> {
    if millis <= 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}
