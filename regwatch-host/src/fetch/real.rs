use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use regwatch_core::codec::{Headers, Request, Response};

use super::{FetchError, FetchFuture, FetchProvider};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `user-agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("regwatch/", env!("CARGO_PKG_VERSION"));

/// Fetch provider that makes real HTTP requests.
#[derive(Debug, Clone)]
pub struct RealFetch {
    client: Client,
    timeout: Duration,
}

impl RealFetch {
    /// Create a provider with the default timeout and user agent.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_settings(DEFAULT_TIMEOUT, DEFAULT_USER_AGENT)
    }

    /// Create a provider with a custom timeout and user agent.
    pub fn with_settings(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Get the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl FetchProvider for RealFetch {
    fn fetch(&self, request: Request) -> FetchFuture<'_> {
        Box::pin(async move {
            let mut builder = self.client.get(&request.url);
            for (name, value) in request.headers.iter().flatten() {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else if e.is_builder() {
                    FetchError::InvalidRequest(e.to_string())
                } else {
                    FetchError::ConnectionFailed(e.to_string())
                }
            })?;

            let status = i32::from(response.status().as_u16());
            // Repeated headers keep their first value; non-text values are dropped.
            let mut headers = Headers::new();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    headers
                        .entry(name.as_str().to_string())
                        .or_insert_with(|| value.to_string());
                }
            }

            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Body(e.to_string())
                }
            })?;

            debug!(url = %request.url, status, bytes = body.len(), "fetched");
            Ok(Response {
                status,
                headers: Some(headers),
                body: Some(body.to_vec()),
            })
        })
    }

    fn is_mock(&self) -> bool {
        false
    }
}
