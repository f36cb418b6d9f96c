//! Print pipeline.
//!
//! [`PrintJobRunner`] is the production [`JobRunner`](crate::job::JobRunner):
//!
//! 1. evaluates the job's access assertion
//! 2. parses the [`PrintRequest`] and computes every panel grid
//! 3. composes each panel through the tiled-raster compositor
//! 4. renders the report on the blocking pool
//! 5. stores it and returns the locator

mod access;
mod request;
mod runner;

pub use access::{AccessDenied, AccessEvaluator, PermitAll};
pub use request::{MapPanel, PrintRequest, RequestError, SourceKind, TileSource};
pub use runner::PrintJobRunner;
