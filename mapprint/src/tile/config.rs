//! Tile fetch configuration.

use std::time::Duration;

/// Default number of extra attempts after a failed fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Default size of the tile fetch pool.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 16;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every tile fetch task of a compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Additional attempts after the first failure (total = retries + 1)
    pub max_retries: u32,
    /// Fixed wait between attempts
    pub retry_interval: Duration,
    /// Tile fetch pool size, independent of the job pool
    pub max_concurrent_fetches: usize,
    /// Timeout applied by the HTTP fetcher to each request
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl FetchConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Total attempts a single tile may make.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
