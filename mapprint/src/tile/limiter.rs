//! Tile fetch pool limiter.
//!
//! The tile fetch pool is sized independently of the job pool. A single
//! limiter is shared by every compositor in the process, so the total number
//! of tile tasks occupying a slot (fetching or sleeping between retries)
//! never exceeds `max_concurrent` no matter how many jobs run at once.
//!
//! ```ignore
//! let limiter = FetchLimiter::new(32);
//! let permit = limiter.acquire().await?;
//! // fetch, decode, retry...
//! drop(permit);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct LimiterStats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl LimiterStats {
    fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);
    }
}

/// Bounded pool of tile fetch slots.
///
/// Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct FetchLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    stats: Arc<LimiterStats>,
}

impl FetchLimiter {
    /// Creates a pool with `max_concurrent` slots (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        let max_permits = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            stats: Arc::new(LimiterStats::default()),
        }
    }

    /// Waits for a free slot. Returns `None` once the pool is closed.
    pub async fn acquire(&self) -> Option<FetchPermit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        self.stats.enter();
        Some(FetchPermit {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Closes the pool; pending and future `acquire` calls return `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_permits
    }

    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::Relaxed)
    }

    /// Highest number of slots held at once since creation or the last reset.
    pub fn peak_in_flight(&self) -> usize {
        self.stats.peak_in_flight.load(Ordering::Relaxed)
    }

    pub fn reset_peak(&self) {
        self.stats.peak_in_flight.store(0, Ordering::Relaxed);
    }
}

/// A held fetch slot, released on drop.
#[derive(Debug)]
pub struct FetchPermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<LimiterStats>,
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
