//! Transport for tile requests.
//!
//! [`TileFetcher`] is the seam between the compose engine and the network.
//! It returns the raw status and body; classifying the outcome (image, no
//! content, failure) belongs to [`super::task::TileFetchTask`].

use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default User-Agent for tile requests. Some tile servers reject requests
/// without one.
pub const DEFAULT_USER_AGENT: &str = concat!("mapprint/", env!("CARGO_PKG_VERSION"));

/// HTTP status for "no data here".
pub const STATUS_NO_CONTENT: u16 = 204;

/// Raw response from a tile endpoint.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failure below the HTTP layer (DNS, connect, TLS, timeout, body read).
#[derive(Debug, Clone, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Issues a single request for a tile URI.
pub trait TileFetcher: Send + Sync + 'static {
    fn fetch(&self, uri: &str)
        -> impl Future<Output = Result<FetchResponse, TransportError>> + Send;
}

/// Tile fetcher over a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTileFetcher {
    client: reqwest::Client,
}

impl ReqwestTileFetcher {
    /// Creates a fetcher with the given per-request timeout.
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| TransportError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TileFetcher for ReqwestTileFetcher {
    async fn fetch(&self, uri: &str) -> Result<FetchResponse, TransportError> {
        let response = self.client.get(uri).send().await.map_err(|e| {
            debug!(uri = %uri, error = %e, "tile request failed");
            TransportError(format!("request failed: {}", e))
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            debug!(uri = %uri, status = status, "tile request returned error status");
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(format!("failed to read body: {}", e)))?;

        Ok(FetchResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version() {
        assert!(DEFAULT_USER_AGENT.starts_with("mapprint/"));
        assert!(DEFAULT_USER_AGENT.len() > "mapprint/".len());
    }

    #[test]
    fn test_client_builds() {
        assert!(ReqwestTileFetcher::new(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let fetcher = ReqwestTileFetcher::new(Duration::from_millis(500)).unwrap();
        // Port 9 on localhost is the discard service and normally closed.
        let result = fetcher.fetch("http://127.0.0.1:9/tile.png").await;
        assert!(result.is_err());
    }
}
