//! Default values and constants for all configuration settings.

use super::file::config_directory;
use super::settings::*;
use crate::logging::DEFAULT_LOG_FILE;
use crate::queue::{DEFAULT_MAX_RETAINED_RESULTS, DEFAULT_RESULT_RETENTION};
use crate::scheduler::{
    default_max_concurrent_jobs, DEFAULT_AVAILABILITY_TTL, DEFAULT_CLAIM_TTL, DEFAULT_CLUSTER_NAME,
    DEFAULT_DISCOVERY_INTERVAL,
};
use crate::scheduler::health::DEFAULT_STALL_WINDOW;
use crate::tile::{
    DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_RETRY_INTERVAL,
};

/// Minimum tile fetch concurrency.
pub const MIN_CONCURRENT_FETCHES: usize = 1;

/// Maximum tile fetch concurrency.
/// Above this, tile servers start rate-limiting.
pub const MAX_CONCURRENT_FETCHES: usize = 256;

/// Clamps fetch concurrency to the valid range and logs a warning if clamped.
pub(super) fn clamp_concurrent_fetches(value: usize) -> usize {
    if value < MIN_CONCURRENT_FETCHES || value > MAX_CONCURRENT_FETCHES {
        let clamped = value.clamp(MIN_CONCURRENT_FETCHES, MAX_CONCURRENT_FETCHES);
        tracing::warn!(
            requested = value,
            min = MIN_CONCURRENT_FETCHES,
            max = MAX_CONCURRENT_FETCHES,
            "max_concurrent_fetches out of range, clamping to {}",
            clamped
        );
        clamped
    } else {
        value
    }
}

/// Clamps job concurrency to at least one worker.
pub(super) fn clamp_concurrent_jobs(value: usize) -> usize {
    if value == 0 {
        tracing::warn!("max_concurrent_jobs = 0, using 1");
        1
    } else {
        value
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let config_dir = config_directory();
        Self {
            scheduler: SchedulerSettings {
                max_concurrent_jobs: default_max_concurrent_jobs(),
                job_timeout_secs: 0,
                result_retention_secs: DEFAULT_RESULT_RETENTION.as_secs(),
                max_retained_results: DEFAULT_MAX_RETAINED_RESULTS,
                cancel_running_on_shutdown: false,
            },
            cluster: ClusterSettings {
                enabled: false,
                name: DEFAULT_CLUSTER_NAME.to_string(),
                instance_id: None,
                claim_ttl_secs: DEFAULT_CLAIM_TTL.as_secs(),
                discovery_interval_ms: DEFAULT_DISCOVERY_INTERVAL.as_millis() as u64,
                availability_ttl_secs: DEFAULT_AVAILABILITY_TTL.as_secs(),
            },
            tiles: TileSettings {
                max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
                max_retries: DEFAULT_MAX_RETRIES,
                retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
                fail_on_error: false,
            },
            health: HealthSettings {
                stall_window_secs: DEFAULT_STALL_WINDOW.as_secs(),
            },
            output: OutputSettings {
                directory: config_dir.join("reports"),
            },
            logging: LoggingSettings {
                directory: config_dir.join("logs"),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
