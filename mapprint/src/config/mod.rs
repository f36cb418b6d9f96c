//! Configuration file support.
//!
//! Settings are read from `~/.mapprint/config.ini`. A missing file yields
//! defaults; unknown keys are ignored. Runtime configs are derived with
//! `From<&ConfigFile>`.

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{MAX_CONCURRENT_FETCHES, MIN_CONCURRENT_FETCHES};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ClusterSettings, ConfigFile, HealthSettings, LoggingSettings, OutputSettings,
    SchedulerSettings, TileSettings,
};

use std::time::Duration;

use crate::scheduler::{ClusterConfig, HealthConfig, SchedulerConfig};
use crate::tile::FetchConfig;

impl From<&ConfigFile> for ClusterConfig {
    fn from(config: &ConfigFile) -> Self {
        let cluster = &config.cluster;
        let mut out = ClusterConfig::default()
            .with_name(cluster.name.clone())
            .with_claim_ttl(Duration::from_secs(cluster.claim_ttl_secs))
            .with_discovery_interval(Duration::from_millis(cluster.discovery_interval_ms))
            .with_availability_ttl(Duration::from_secs(cluster.availability_ttl_secs));
        if let Some(id) = &cluster.instance_id {
            out = out.with_instance_id(id.clone());
        }
        out
    }
}

impl From<&ConfigFile> for SchedulerConfig {
    fn from(config: &ConfigFile) -> Self {
        let scheduler = &config.scheduler;
        let timeout =
            (scheduler.job_timeout_secs > 0).then(|| Duration::from_secs(scheduler.job_timeout_secs));
        let mut out = SchedulerConfig::default()
            .with_max_concurrent_jobs(scheduler.max_concurrent_jobs)
            .with_job_timeout(timeout)
            .with_result_retention(Duration::from_secs(scheduler.result_retention_secs))
            .with_max_retained_results(scheduler.max_retained_results)
            .with_cancel_running_on_shutdown(scheduler.cancel_running_on_shutdown);
        if config.cluster.enabled {
            out = out.clustered(ClusterConfig::from(config));
        }
        out
    }
}

impl From<&ConfigFile> for FetchConfig {
    fn from(config: &ConfigFile) -> Self {
        let tiles = &config.tiles;
        FetchConfig::default()
            .with_max_retries(tiles.max_retries)
            .with_retry_interval(Duration::from_millis(tiles.retry_interval_ms))
            .with_max_concurrent_fetches(tiles.max_concurrent_fetches)
            .with_request_timeout(Duration::from_secs(tiles.request_timeout_secs))
    }
}

impl From<&ConfigFile> for HealthConfig {
    fn from(config: &ConfigFile) -> Self {
        HealthConfig::default().with_stall_window(Duration::from_secs(config.health.stall_window_secs))
    }
}
