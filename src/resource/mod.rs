//! Retrying HTTP fetcher
//!
//! Performs one logical retrieval: transport failures and non-2xx responses
//! are retried according to a [`RetryPolicy`], and every attempt and backoff
//! is bounded by the caller's [`RaceContext`].

mod retry;

pub use retry::RetryPolicy;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::debug;

use crate::config::RetrySettings;
use crate::race::RaceContext;
use crate::{IgnitionError, SourceError};

/// Media type prefix identifying an embedded provisioning config
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.coreos.ignition+json";

const CONFIG_ACCEPT: &str = "application/vnd.coreos.ignition+json;version=3.0.0, */*;q=0.1";

const CONFIG_USER_AGENT: &str = concat!("ignition-rs/", env!("CARGO_PKG_VERSION"));

/// Headers attached to every config fetch
pub fn config_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(ACCEPT, HeaderValue::from_static(CONFIG_ACCEPT));
    headers.insert(USER_AGENT, HeaderValue::from_static(CONFIG_USER_AGENT));
    headers
}

/// Per-fetch options
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Headers sent with the request
    pub headers: HeaderMap,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// A successful response
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Vec<u8>,
    /// Response headers, kept for content-type inspection
    pub headers: HeaderMap,
}

impl Fetched {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// HTTP client with retries
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(policy: RetryPolicy, request_timeout: Duration) -> Result<Self, IgnitionError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(2)))
            .build()
            .map_err(|e| IgnitionError::Http(e.to_string()))?;

        Ok(Self { client, policy })
    }

    pub fn from_settings(settings: &RetrySettings) -> Result<Self, IgnitionError> {
        Self::new(
            RetryPolicy::from(settings),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`, retrying until it succeeds, retries run out, or `ctx` ends
    pub async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        ctx: &RaceContext,
    ) -> Result<Fetched, SourceError> {
        let mut retry = 0;
        loop {
            let err = match ctx.run(self.fetch_once(url, options)).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if e.is_context_end() => return Err(e),
                Err(e) => e,
            };

            retry += 1;
            let Some(delay) = self.policy.backoff(retry) else {
                return Err(err);
            };
            debug!(
                "GET {} failed: {}; retrying in {:?} (retry {}/{})",
                url, err, delay, retry, self.policy.max_retries
            );
            ctx.sleep(delay).await?;
        }
    }

    async fn fetch_once(&self, url: &str, options: &FetchOptions) -> Result<Fetched, SourceError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .headers(options.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::transport(format!("GET {url}: {status}")));
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        debug!("GET {}: {} ({} bytes)", url, status, body.len());

        Ok(Fetched { body, headers })
    }
}
