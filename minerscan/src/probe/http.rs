//! HTTP prober for Antminer-style management interfaces.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode, Url};
use tokio_util::sync::CancellationToken;

use super::{ADDRESS_PLACEHOLDER, Credentials, DeviceProber, ProbeError};
use crate::model::Device;
use crate::tracing::prelude::*;

/// Probes devices over HTTP with Digest (or Basic) authentication.
///
/// Each endpoint attempt is bounded as a whole by the timeout given at
/// construction, so a challenge and its authenticated retry share one
/// budget.
pub struct HttpProber {
    client: Client,
    endpoints: Vec<String>,
    credentials: Credentials,
    timeout: Duration,
}

impl HttpProber {
    /// Create a prober.
    ///
    /// `endpoints` are URL templates tried in order, with `{ip}` replaced
    /// by the device address, e.g. `http://{ip}/cgi-bin/stats.cgi`.
    pub fn new(
        endpoints: Vec<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        if endpoints.is_empty() {
            return Err(ProbeError::NoEndpoints);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoints,
            credentials,
            timeout,
        })
    }

    fn endpoint_urls<'a>(&'a self, address: &'a str) -> impl Iterator<Item = String> + 'a {
        self.endpoints
            .iter()
            .map(move |template| template.replace(ADDRESS_PLACEHOLDER, address))
    }

    /// One endpoint attempt: GET, answer an auth challenge if there is
    /// one, and require a 200.
    async fn fetch(&self, url: &str) -> Result<Bytes, ProbeError> {
        let parsed = Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut response = self.client.get(parsed.clone()).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            response = self.answer_challenge(&parsed, response).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(ProbeError::Auth("credentials rejected".into()));
            }
        }

        if response.status() != StatusCode::OK {
            return Err(ProbeError::Status(response.status().as_u16()));
        }

        Ok(response.bytes().await?)
    }

    async fn answer_challenge(&self, url: &Url, response: Response) -> Result<Response, ProbeError> {
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ProbeError::Auth("401 without a usable challenge".into()))?
            .to_string();

        let scheme = challenge
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let request = match scheme.as_str() {
            "digest" => {
                let mut prompt = digest_auth::parse(&challenge)
                    .map_err(|e| ProbeError::Auth(format!("bad digest challenge: {e}")))?;

                let uri = match url.query() {
                    Some(query) => format!("{}?{}", url.path(), query),
                    None => url.path().to_string(),
                };
                let context = digest_auth::AuthContext::new(
                    self.credentials.username.as_str(),
                    self.credentials.password.as_str(),
                    uri,
                );
                let answer = prompt
                    .respond(&context)
                    .map_err(|e| ProbeError::Auth(format!("cannot answer digest challenge: {e}")))?;

                self.client
                    .get(url.clone())
                    .header(AUTHORIZATION, answer.to_header_string())
            }
            "basic" => self.client.get(url.clone()).basic_auth(
                &self.credentials.username,
                Some(&self.credentials.password),
            ),
            other => {
                return Err(ProbeError::Auth(format!(
                    "unsupported auth scheme {other:?}"
                )));
            }
        };

        Ok(request.send().await?)
    }
}

#[async_trait]
impl DeviceProber for HttpProber {
    async fn probe(&self, device: &Device, cancel: &CancellationToken) -> Result<Bytes, ProbeError> {
        let address = device.address().ok_or(ProbeError::NoAddress)?;

        let mut attempts = 0;
        let mut last = None;

        for url in self.endpoint_urls(address) {
            attempts += 1;

            // Dropping the losing future aborts the request and its
            // connection.
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                result = tokio::time::timeout(self.timeout, self.fetch(&url)) => {
                    result.unwrap_or(Err(ProbeError::Timeout))
                }
            };

            match result {
                Ok(body) => {
                    trace!(url = %url, bytes = body.len(), "Endpoint answered");
                    return Ok(body);
                }
                Err(e) => {
                    trace!(url = %url, error = %e, "Endpoint failed");
                    last = Some(e);
                }
            }
        }

        match last {
            Some(last) => Err(ProbeError::AllEndpointsFailed {
                attempts,
                last: Box::new(last),
            }),
            None => Err(ProbeError::NoEndpoints),
        }
    }
}
