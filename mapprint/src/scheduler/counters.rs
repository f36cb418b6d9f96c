//! Process-local execution counters.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters updated once per finished job.
#[derive(Debug, Default)]
pub struct ExecutionCounters {
    jobs_run: AtomicU64,
    time_spent_ms: AtomicU64,
    /// Epoch millis of the last finish, 1-indexed so 0 = never
    last_executed_ms: AtomicU64,
}

impl ExecutionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, elapsed: Duration, finished_at: DateTime<Utc>) {
        self.jobs_run.fetch_add(1, Ordering::Relaxed);
        self.time_spent_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        let stamp = finished_at.timestamp_millis().max(0) as u64 + 1;
        self.last_executed_ms.fetch_max(stamp, Ordering::Relaxed);
    }

    pub fn jobs_run(&self) -> u64 {
        self.jobs_run.load(Ordering::Relaxed)
    }

    pub fn time_spent(&self) -> Duration {
        Duration::from_millis(self.time_spent_ms.load(Ordering::Relaxed))
    }

    pub fn last_executed(&self) -> Option<DateTime<Utc>> {
        match self.last_executed_ms.load(Ordering::Relaxed) {
            0 => None,
            stamp => epoch_millis_to_datetime(stamp as i64 - 1),
        }
    }

    pub fn average_time_spent(&self) -> Option<Duration> {
        average(self.time_spent(), self.jobs_run())
    }
}

/// Mean duration, `None` when nothing ran.
pub(crate) fn average(total: Duration, count: u64) -> Option<Duration> {
    if count == 0 {
        return None;
    }
    Some(Duration::from_millis(
        (total.as_millis() / u128::from(count)) as u64,
    ))
}

pub(crate) fn epoch_millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_run() {
        let counters = ExecutionCounters::new();
        assert_eq!(counters.jobs_run(), 0);
        assert_eq!(counters.last_executed(), None);
        assert_eq!(counters.average_time_spent(), None);
    }

    #[test]
    fn test_record_and_average() {
        let counters = ExecutionCounters::new();
        let t1 = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let t2 = Utc.timestamp_millis_opt(1_700_000_005_000).unwrap();

        counters.record(Duration::from_millis(100), t2);
        counters.record(Duration::from_millis(300), t1);

        assert_eq!(counters.jobs_run(), 2);
        assert_eq!(counters.time_spent(), Duration::from_millis(400));
        assert_eq!(
            counters.average_time_spent(),
            Some(Duration::from_millis(200))
        );
        // An out-of-order finish does not move the timestamp backwards.
        assert_eq!(counters.last_executed(), Some(t2));
    }

    #[test]
    fn test_epoch_zero_is_distinct_from_never() {
        let counters = ExecutionCounters::new();
        let epoch = Utc.timestamp_millis_opt(0).unwrap();
        counters.record(Duration::ZERO, epoch);
        assert_eq!(counters.last_executed(), Some(epoch));
    }
}
