//! Thin reqwest wrapper the dispatcher sends upstream requests through.
//! Holds only transport concerns — connection pooling and the two
//! timeouts below — never provider or account knowledge.

use std::time::Duration;

use broker_provider_core::provider::{HttpMethod, UpstreamRequest};
use thiserror::Error;

/// No response at all within 600s is a terminal transport failure for the
/// whole request.
pub const DEFAULT_TOTAL_TIMEOUT_MS: u64 = 600_000;

/// Streaming responses are allowed to run past the total timeout as long
/// as bytes keep arriving at least this often.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Error)]
pub enum UpstreamClientError {
    #[error("upstream did not respond within the total timeout")]
    TotalTimeout,
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    total_timeout: Duration,
    idle_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(total_timeout_ms: u64, idle_timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builder with only timeout settings never fails");
        Self {
            client,
            total_timeout: Duration::from_millis(total_timeout_ms),
            idle_timeout: Duration::from_millis(idle_timeout_ms),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Sends `request` and waits for the response head, bounded by the
    /// total timeout. The body is returned unread so the caller can stream
    /// it and apply the idle timeout per chunk — the two timeouts apply at
    /// different points of the exchange.
    pub async fn send(&self, request: UpstreamRequest) -> Result<reqwest::Response, UpstreamClientError> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };
        let builder = request
            .headers
            .iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value))
            .body(request.body);

        match tokio::time::timeout(self.total_timeout, builder.send()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(UpstreamClientError::TotalTimeout),
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS)
    }
}
