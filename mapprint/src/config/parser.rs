//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::defaults::{clamp_concurrent_fetches, clamp_concurrent_jobs};
use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [scheduler] section
    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = section.get("max_concurrent_jobs") {
            let jobs = parse_number("scheduler", "max_concurrent_jobs", v)?;
            config.scheduler.max_concurrent_jobs = clamp_concurrent_jobs(jobs);
        }
        if let Some(v) = section.get("job_timeout_secs") {
            config.scheduler.job_timeout_secs = parse_number("scheduler", "job_timeout_secs", v)?;
        }
        if let Some(v) = section.get("result_retention_secs") {
            config.scheduler.result_retention_secs =
                parse_number("scheduler", "result_retention_secs", v)?;
        }
        if let Some(v) = section.get("max_retained_results") {
            config.scheduler.max_retained_results =
                parse_number::<usize>("scheduler", "max_retained_results", v)?.max(1);
        }
        if let Some(v) = section.get("cancel_running_on_shutdown") {
            config.scheduler.cancel_running_on_shutdown = parse_bool(v);
        }
    }

    // [cluster] section
    if let Some(section) = ini.section(Some("cluster")) {
        if let Some(v) = section.get("enabled") {
            config.cluster.enabled = parse_bool(v);
        }
        if let Some(v) = section.get("name") {
            let v = v.trim();
            if v.is_empty() || v.contains(':') {
                return Err(ConfigFileError::InvalidValue {
                    section: "cluster".to_string(),
                    key: "name".to_string(),
                    value: v.to_string(),
                    reason: "must be non-empty and must not contain ':'".to_string(),
                });
            }
            config.cluster.name = v.to_string();
        }
        if let Some(v) = section.get("instance_id") {
            let v = v.trim();
            config.cluster.instance_id = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = section.get("claim_ttl_secs") {
            let ttl: u64 = parse_number("cluster", "claim_ttl_secs", v)?;
            if ttl == 0 {
                return Err(ConfigFileError::InvalidValue {
                    section: "cluster".to_string(),
                    key: "claim_ttl_secs".to_string(),
                    value: v.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.cluster.claim_ttl_secs = ttl;
        }
        if let Some(v) = section.get("discovery_interval_ms") {
            config.cluster.discovery_interval_ms =
                parse_number::<u64>("cluster", "discovery_interval_ms", v)?.max(1);
        }
        if let Some(v) = section.get("availability_ttl_secs") {
            config.cluster.availability_ttl_secs =
                parse_number::<u64>("cluster", "availability_ttl_secs", v)?.max(1);
        }
    }

    // [tiles] section
    if let Some(section) = ini.section(Some("tiles")) {
        if let Some(v) = section.get("max_concurrent_fetches") {
            let fetches = parse_number("tiles", "max_concurrent_fetches", v)?;
            config.tiles.max_concurrent_fetches = clamp_concurrent_fetches(fetches);
        }
        if let Some(v) = section.get("max_retries") {
            config.tiles.max_retries = parse_number("tiles", "max_retries", v)?;
        }
        if let Some(v) = section.get("retry_interval_ms") {
            config.tiles.retry_interval_ms = parse_number("tiles", "retry_interval_ms", v)?;
        }
        if let Some(v) = section.get("request_timeout_secs") {
            config.tiles.request_timeout_secs =
                parse_number::<u64>("tiles", "request_timeout_secs", v)?.max(1);
        }
        if let Some(v) = section.get("fail_on_error") {
            config.tiles.fail_on_error = parse_bool(v);
        }
    }

    // [health] section
    if let Some(section) = ini.section(Some("health")) {
        if let Some(v) = section.get("stall_window_secs") {
            config.health.stall_window_secs =
                parse_number::<u64>("health", "stall_window_secs", v)?.max(1);
        }
    }

    // [output] section
    if let Some(section) = ini.section(Some("output")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.output.directory = expand_tilde(v);
            }
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be a non-negative integer".to_string(),
        })
}

/// Parse a boolean value from config (accepts true/false, 1/0, yes/no, on/off).
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
