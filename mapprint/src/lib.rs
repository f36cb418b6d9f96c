//! MapPrint - clustered print-job scheduling over tiled map rasters
//!
//! A print job composes one or more map panels from tile servers (XYZ, WMS,
//! WMTS), renders them into a report and stores it. Jobs run with bounded
//! parallelism; several instances sharing a registry execute every job
//! exactly once.
//!
//! # High-Level API
//!
//! The [`service`] module wires everything from a config file:
//!
//! ```ignore
//! use mapprint::config::ConfigFile;
//! use mapprint::job::AccessAssertion;
//! use mapprint::service::PrintService;
//!
//! let service = PrintService::from_config(&ConfigFile::load()?)?;
//! let id = service.submit(request, AccessAssertion::anonymous()).await?;
//! let status = service.status(&id).await?;
//! ```

pub mod config;
pub mod job;
pub mod logging;
pub mod print;
pub mod queue;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod service;
pub mod tile;

/// Version of the MapPrint library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_manifest() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
        assert!(!VERSION.is_empty());
    }
}
