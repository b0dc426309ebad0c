//! Fetching raw telemetry from a single device.
//!
//! A probe walks an ordered list of candidate endpoints on the device and
//! returns the body of the first one that answers 200. The scanner only
//! sees the [`DeviceProber`] trait, so tests can drive it with
//! instrumented fakes.

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::Device;

pub use http::HttpProber;

/// Placeholder substituted with the device address in endpoint templates.
pub const ADDRESS_PLACEHOLDER: &str = "{ip}";

/// Something that can fetch a device's raw stats payload.
#[async_trait]
pub trait DeviceProber: Send + Sync {
    /// Fetch the stats payload for `device`.
    ///
    /// Must return promptly with [`ProbeError::Cancelled`] once `cancel`
    /// fires, abandoning any request in flight.
    async fn probe(&self, device: &Device, cancel: &CancellationToken) -> Result<Bytes, ProbeError>;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("device has no address")]
    NoAddress,

    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("probe cancelled")]
    Cancelled,

    #[error("all {attempts} endpoint(s) failed, last error: {last}")]
    AllEndpointsFailed {
        attempts: usize,
        #[source]
        last: Box<ProbeError>,
    },
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Connection(err.to_string())
        }
    }
}

/// Login for the devices' management interface. Shared by every device
/// in a pass.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
