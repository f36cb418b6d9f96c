//! Artifact storage.

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{RenderedReport, ReportError};
use crate::job::ReferenceId;

/// Persists rendered reports and returns a locator for them.
pub trait ReportStore: Send + Sync + 'static {
    fn store<'a>(
        &'a self,
        reference_id: &'a ReferenceId,
        report: &'a RenderedReport,
    ) -> BoxFuture<'a, Result<String, ReportError>>;
}

/// Writes reports to `<directory>/<reference id>.<extension>`.
#[derive(Debug, Clone)]
pub struct FileReportStore {
    directory: PathBuf,
}

impl FileReportStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, reference_id: &ReferenceId, extension: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", reference_id.as_str(), extension))
    }
}

impl ReportStore for FileReportStore {
    fn store<'a>(
        &'a self,
        reference_id: &'a ReferenceId,
        report: &'a RenderedReport,
    ) -> BoxFuture<'a, Result<String, ReportError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.directory).await?;

            // Write atomically via temp file
            let path = self.path_for(reference_id, &report.extension);
            let temp_path = path.with_extension("tmp");
            tokio::fs::write(&temp_path, &report.bytes).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            let path = tokio::fs::canonicalize(&path).await?;
            debug!(
                reference_id = %reference_id,
                path = %path.display(),
                bytes = report.bytes.len(),
                "report stored"
            );
            Ok(file_locator(&path))
        })
    }
}

/// `file://` URI for an absolute path.
pub fn file_locator(path: &Path) -> String {
    format!("file://{}", path.display())
}
