//! Queue health evaluation.
//!
//! Health is a pure function of two consecutive samples of the scheduler's
//! counters, so it can be evaluated anywhere a pair of samples is at hand.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// Default window after which waiting jobs with no completion count as stalled.
pub const DEFAULT_STALL_WINDOW: Duration = Duration::from_secs(300);

/// Health thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    pub stall_window: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stall_window: DEFAULT_STALL_WINDOW,
        }
    }
}

impl HealthConfig {
    pub fn with_stall_window(mut self, window: Duration) -> Self {
        self.stall_window = window;
        self
    }
}

/// Point-in-time view of the scheduler's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSample {
    pub taken_at: DateTime<Utc>,
    pub waiting: usize,
    pub running: usize,
    pub jobs_run: u64,
    pub last_executed: Option<DateTime<Utc>>,
}

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Waiting count grew since the previous sample
    Overloaded,
    /// Jobs are waiting but nothing completed within the window
    Stalled,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Overloaded => "overloaded",
            HealthStatus::Stalled => "stalled",
        }
    }
}

/// Result of comparing two samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub stalled: bool,
    pub overloaded: bool,
    pub message: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        !self.stalled && !self.overloaded
    }

    /// Most severe condition; a stall outranks an overload.
    pub fn status(&self) -> HealthStatus {
        if self.stalled {
            HealthStatus::Stalled
        } else if self.overloaded {
            HealthStatus::Overloaded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Evaluates the current sample against the previous one.
pub fn evaluate(
    previous: Option<&HealthSample>,
    current: &HealthSample,
    config: &HealthConfig,
) -> HealthReport {
    let overloaded = previous.is_some_and(|prev| current.waiting > prev.waiting);
    let stalled = current.waiting > 0 && idle_for(previous, current) >= Some(config.stall_window);

    let message = match (stalled, overloaded) {
        (true, _) => format!(
            "{} job(s) waiting and none completed in the last {}s",
            current.waiting,
            config.stall_window.as_secs()
        ),
        (false, true) => format!(
            "waiting jobs grew from {} to {}",
            previous.map(|p| p.waiting).unwrap_or_default(),
            current.waiting
        ),
        (false, false) => format!(
            "{} waiting, {} running, {} run",
            current.waiting, current.running, current.jobs_run
        ),
    };

    HealthReport {
        stalled,
        overloaded,
        message,
    }
}

/// How long the scheduler has gone without a completion.
fn idle_for(previous: Option<&HealthSample>, current: &HealthSample) -> Option<Duration> {
    let since = match current.last_executed {
        Some(last) => last,
        None => previous.filter(|p| p.waiting > 0)?.taken_at,
    };
    (current.taken_at - since).to_std().ok()
}

/// Keeps the previous sample between checks.
#[derive(Debug, Default)]
pub struct QueueHealthCheck {
    config: HealthConfig,
    previous: Mutex<Option<HealthSample>>,
}

impl QueueHealthCheck {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            previous: Mutex::new(None),
        }
    }

    /// Evaluates `sample` and remembers it for the next call.
    pub fn check(&self, sample: HealthSample) -> HealthReport {
        let mut previous = self.previous.lock();
        let report = evaluate(previous.as_ref(), &sample, &self.config);
        *previous = Some(sample);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(taken: i64, waiting: usize, last: Option<i64>) -> HealthSample {
        HealthSample {
            taken_at: at(taken),
            waiting,
            running: 1,
            jobs_run: 0,
            last_executed: last.map(at),
        }
    }

    fn config() -> HealthConfig {
        HealthConfig::default().with_stall_window(Duration::from_secs(60))
    }

    #[test]
    fn test_growing_queue_without_progress_is_unhealthy() {
        let prev = sample(0, 3, Some(-10));
        let cur = sample(90, 5, Some(-10));
        let report = evaluate(Some(&prev), &cur, &config());
        assert!(report.overloaded);
        assert!(report.stalled);
        assert_eq!(report.status(), HealthStatus::Stalled);
        assert!(!report.is_healthy());
    }

    #[test]
    fn test_draining_queue_with_progress_is_healthy() {
        let prev = sample(0, 5, Some(-5));
        let cur = sample(30, 4, Some(25));
        let report = evaluate(Some(&prev), &cur, &config());
        assert!(report.is_healthy(), "{}", report.message);
        assert_eq!(report.status().as_str(), "healthy");
    }

    #[test]
    fn test_growth_alone_is_overload() {
        let prev = sample(0, 2, Some(-1));
        let cur = sample(10, 3, Some(9));
        let report = evaluate(Some(&prev), &cur, &config());
        assert!(report.overloaded);
        assert!(!report.stalled);
        assert_eq!(report.status(), HealthStatus::Overloaded);
    }

    #[test]
    fn test_never_executed_stalls_after_window() {
        let first = sample(0, 2, None);
        assert!(evaluate(None, &first, &config()).is_healthy());

        let early = sample(30, 2, None);
        assert!(!evaluate(Some(&first), &early, &config()).stalled);

        let late = sample(61, 2, None);
        assert!(evaluate(Some(&first), &late, &config()).stalled);
    }

    #[test]
    fn test_empty_queue_never_stalls() {
        let prev = sample(0, 0, None);
        let cur = sample(10_000, 0, None);
        assert!(evaluate(Some(&prev), &cur, &config()).is_healthy());
    }

    #[test]
    fn test_check_keeps_previous_sample() {
        let check = QueueHealthCheck::new(config());
        assert!(check.check(sample(0, 1, Some(0))).is_healthy());
        assert!(check.check(sample(5, 4, Some(0))).overloaded);
        assert!(check.check(sample(10, 4, Some(9))).is_healthy());
    }
}
