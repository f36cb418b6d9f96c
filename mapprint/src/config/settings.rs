//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub scheduler: SchedulerSettings,
    pub cluster: ClusterSettings,
    pub tiles: TileSettings,
    pub health: HealthSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

/// Job execution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Jobs running at once in this process
    pub max_concurrent_jobs: usize,
    /// Wall-clock limit per job in seconds (0 = none)
    pub job_timeout_secs: u64,
    /// How long finished jobs stay queryable
    pub result_retention_secs: u64,
    /// How many finished jobs stay queryable
    pub max_retained_results: usize,
    /// Cancel running jobs on shutdown instead of letting them finish
    pub cancel_running_on_shutdown: bool,
}

/// Cluster coordination settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSettings {
    pub enabled: bool,
    /// Namespace shared by all members of one cluster
    pub name: String,
    /// Fixed instance identity; random when unset
    pub instance_id: Option<String>,
    pub claim_ttl_secs: u64,
    pub discovery_interval_ms: u64,
    pub availability_ttl_secs: u64,
}

/// Tile fetch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSettings {
    pub max_concurrent_fetches: usize,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Default failure policy for panels that do not set their own
    pub fail_on_error: bool,
}

/// Health check settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSettings {
    pub stall_window_secs: u64,
}

/// Report output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// Directory the file report store writes to
    pub directory: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    /// Log file name inside `directory`
    pub file: String,
}
