//! Report rendering, storage and retrieval.
//!
//! A finished print job hands its composed panels to a [`ReportRenderer`],
//! persists the bytes through a [`ReportStore`] and records the returned
//! locator. Clients later fetch the artifact through [`ReportLoaders`],
//! which dispatches to the first [`ReportLoader`] accepting the locator.

mod loader;
mod renderer;
mod store;

pub use loader::{FileReportLoader, ReportLoader, ReportLoaders};
pub use renderer::{PngPanelRenderer, RenderedReport, ReportDocument, ReportRenderer};
pub use store::{file_locator, FileReportStore, ReportStore};

use thiserror::Error;

/// Errors from rendering, storing or loading reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("report has no panels")]
    Empty,

    #[error("report of {width}x{height} pixels exceeds the limit of {limit} pixels")]
    TooLarge { width: u64, height: u64, limit: u64 },

    #[error("image encoding failed: {0}")]
    Encoding(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no loader accepts {0}")]
    UnsupportedLocator(String),

    #[error("report not found: {0}")]
    NotFound(String),
}
