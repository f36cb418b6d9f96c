//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let instance_id = config.cluster.instance_id.as_deref().unwrap_or("");

    format!(
        r#"; MapPrint configuration
; Values left out fall back to their defaults.

[scheduler]
; Jobs executed at once by this process (minimum 1)
max_concurrent_jobs = {max_concurrent_jobs}
; Wall-clock limit per job in seconds, 0 disables it
job_timeout_secs = {job_timeout_secs}
; How long finished jobs stay queryable
result_retention_secs = {result_retention_secs}
max_retained_results = {max_retained_results}
; true: cancel running jobs on shutdown, false: let them finish
cancel_running_on_shutdown = {cancel_running_on_shutdown}

[cluster]
enabled = {cluster_enabled}
; Shared namespace of one cluster (no ':')
name = {cluster_name}
; Leave empty to generate a random identity at startup
instance_id = {instance_id}
; A claim not refreshed within this time is released to other instances
claim_ttl_secs = {claim_ttl_secs}
discovery_interval_ms = {discovery_interval_ms}
availability_ttl_secs = {availability_ttl_secs}

[tiles]
; Size of the shared tile fetch pool (1-256)
max_concurrent_fetches = {max_concurrent_fetches}
max_retries = {max_retries}
retry_interval_ms = {retry_interval_ms}
request_timeout_secs = {request_timeout_secs}
; true: a tile that exhausts its retries fails the whole job
fail_on_error = {fail_on_error}

[health]
; Waiting jobs with no execution for this long mark the queue stalled
stall_window_secs = {stall_window_secs}

[output]
directory = {output_directory}

[logging]
directory = {log_directory}
file = {log_file}
"#,
        max_concurrent_jobs = config.scheduler.max_concurrent_jobs,
        job_timeout_secs = config.scheduler.job_timeout_secs,
        result_retention_secs = config.scheduler.result_retention_secs,
        max_retained_results = config.scheduler.max_retained_results,
        cancel_running_on_shutdown = config.scheduler.cancel_running_on_shutdown,
        cluster_enabled = config.cluster.enabled,
        cluster_name = config.cluster.name,
        instance_id = instance_id,
        claim_ttl_secs = config.cluster.claim_ttl_secs,
        discovery_interval_ms = config.cluster.discovery_interval_ms,
        availability_ttl_secs = config.cluster.availability_ttl_secs,
        max_concurrent_fetches = config.tiles.max_concurrent_fetches,
        max_retries = config.tiles.max_retries,
        retry_interval_ms = config.tiles.retry_interval_ms,
        request_timeout_secs = config.tiles.request_timeout_secs,
        fail_on_error = config.tiles.fail_on_error,
        stall_window_secs = config.health.stall_window_secs,
        output_directory = path_to_string(&config.output.directory),
        log_directory = path_to_string(&config.logging.directory),
        log_file = config.logging.file,
    )
}

/// Convert a path to a string, replacing the home directory with ~.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
