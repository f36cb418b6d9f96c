//! Scheduler configuration.

use std::time::Duration;

use crate::queue::{DEFAULT_MAX_RETAINED_RESULTS, DEFAULT_RESULT_RETENTION};

/// Default cluster namespace.
pub const DEFAULT_CLUSTER_NAME: &str = "mapprint";

/// Default claim marker lifetime.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(30);

/// Default period of the cluster discovery poll.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_millis(1000);

/// Default lifetime of an untouched "job available" marker.
pub const DEFAULT_AVAILABILITY_TTL: Duration = Duration::from_secs(3600);

/// Default number of concurrent jobs per process.
pub fn default_max_concurrent_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 8)
}

/// Cluster coordination settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Namespace for all registry keys
    pub name: String,
    /// Identity of this instance, stored in the claims it holds
    pub instance_id: String,
    /// Lifetime of a claim that is not refreshed
    pub claim_ttl: Duration,
    /// How often other instances' jobs are discovered
    pub discovery_interval: Duration,
    /// Lifetime of an untouched availability marker
    pub availability_ttl: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLUSTER_NAME.to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            claim_ttl: DEFAULT_CLAIM_TTL,
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            availability_ttl: DEFAULT_AVAILABILITY_TTL,
        }
    }
}

impl ClusterConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn with_availability_ttl(mut self, ttl: Duration) -> Self {
        self.availability_ttl = ttl;
        self
    }

    /// Period at which a running job's claim is kept warm.
    pub fn claim_refresh_interval(&self) -> Duration {
        (self.claim_ttl / 3).max(Duration::from_millis(10))
    }
}

/// Job scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Hard cap on simultaneously running jobs in this process
    pub max_concurrent_jobs: usize,
    /// Coordinate with other instances through the shared registry
    pub clustered: bool,
    pub cluster: ClusterConfig,
    /// Wall-clock limit per job; `None` disables it
    pub job_timeout: Option<Duration>,
    /// How long finished jobs stay queryable
    pub result_retention: Duration,
    /// How many finished jobs stay queryable
    pub max_retained_results: usize,
    /// Raise the cancellation flag of running jobs on shutdown instead of
    /// letting them finish
    pub cancel_running_on_shutdown: bool,
    /// Period of local housekeeping (retention purge) when not clustered
    pub housekeeping_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            clustered: false,
            cluster: ClusterConfig::default(),
            job_timeout: None,
            result_retention: DEFAULT_RESULT_RETENTION,
            max_retained_results: DEFAULT_MAX_RETAINED_RESULTS,
            cancel_running_on_shutdown: false,
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enables cluster mode with the given settings.
    pub fn clustered(mut self, cluster: ClusterConfig) -> Self {
        self.clustered = true;
        self.cluster = cluster;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_result_retention(mut self, retention: Duration) -> Self {
        self.result_retention = retention;
        self
    }

    pub fn with_max_retained_results(mut self, max: usize) -> Self {
        self.max_retained_results = max.max(1);
        self
    }

    pub fn with_cancel_running_on_shutdown(mut self, cancel: bool) -> Self {
        self.cancel_running_on_shutdown = cancel;
        self
    }
}
