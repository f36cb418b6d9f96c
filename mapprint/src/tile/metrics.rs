//! Lock-free tile fetch counters.
//!
//! Degraded composition paints failed tiles transparent and still succeeds,
//! so these counters are the only trace of a silently failing source.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every fetch task of a compositor.
#[derive(Debug, Default)]
pub struct TileMetrics {
    /// Tiles decoded into an image
    fetched: AtomicU64,
    /// Tiles answered with "no content"
    no_content: AtomicU64,
    /// Extra attempts after a failed one
    retried: AtomicU64,
    /// Tiles that exhausted their retries
    failed: AtomicU64,
    /// Failed tiles painted transparent instead of aborting
    degraded: AtomicU64,
    /// Response bytes received
    bytes: AtomicU64,
}

impl TileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetched(&self, bytes: usize) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_no_content(&self) {
        self.no_content.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, degraded: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> TileMetricsSnapshot {
        TileMetricsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            no_content: self.no_content.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TileMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileMetricsSnapshot {
    pub fetched: u64,
    pub no_content: u64,
    pub retried: u64,
    pub failed: u64,
    pub degraded: u64,
    pub bytes: u64,
}

impl TileMetricsSnapshot {
    /// Tiles that reached a final outcome.
    pub fn completed(&self) -> u64 {
        self.fetched + self.no_content + self.failed
    }
}
