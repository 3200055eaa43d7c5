//! Shared HTTP plumbing for the Mapbox APIs.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::MapboxConfig;
use crate::error::ProviderError;

/// Authenticated client for one Mapbox account.
#[derive(Clone)]
pub struct MapboxClient {
    http: Client,
    api_base: Url,
    token: String,
    username: String,
}

impl MapboxClient {
    pub fn new(api_base: &str, token: &str, username: &str, timeout: Duration) -> Result<Self> {
        let api_base =
            Url::parse(api_base).with_context(|| format!("Invalid Mapbox API base: {}", api_base))?;
        let http = Client::builder()
            .user_agent(concat!("isoverlap/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_base,
            token: token.to_string(),
            username: username.to_string(),
        })
    }

    /// Client for a validated [`MapboxConfig`].
    pub fn from_config(config: &MapboxConfig, timeout: Duration) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .context("mapbox.token is not set")?;
        let username = config
            .username
            .as_deref()
            .context("mapbox.username is not set")?;
        Self::new(&config.api_base, token, username, timeout)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// `{api_base}/{segments...}?access_token=...`. Segments are percent-encoded
    /// individually, so a tileset id or `{lon},{lat}` pair goes in as one.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Failure(format!("cannot build path on {}", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("access_token", &self.token);
        Ok(url)
    }

    /// Send a request and decode the JSON body, mapping HTTP failures onto
    /// [`ProviderError`]. An empty success body decodes to `Value::Null`.
    pub async fn send_json(&self, request: RequestBuilder) -> Result<Value, ProviderError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!("Mapbox {} {}", status.as_u16(), response.url().path());

        if status.is_success() {
            let body = response.text().await.map_err(transport_error)?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body)
                .map_err(|e| ProviderError::Malformed(format!("invalid JSON body: {}", e)));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), retry_after, &body))
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    // The client-level timeout surfaces here rather than in tokio's timeout
    if e.is_timeout() {
        ProviderError::Unavailable(format!("request timed out: {}", e))
    } else if e.is_connect() {
        ProviderError::Unavailable(format!("connection failed: {}", e))
    } else if e.is_decode() {
        ProviderError::Malformed(e.to_string())
    } else {
        ProviderError::Failure(e.to_string())
    }
}

/// Mapbox error bodies look like `{"message": "..."}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// 429 is throttling, 5xx is transient, any other non-success is final.
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = error_message(body);
    match status {
        429 => ProviderError::RateLimited { retry_after },
        500..=599 => ProviderError::Unavailable(format!("{}: {}", status, message)),
        _ => ProviderError::Failure(format!("{}: {}", status, message)),
    }
}
