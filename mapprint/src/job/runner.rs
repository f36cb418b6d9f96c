//! Job execution seam.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::status::{ErrorKind, PrintJobResult};
use super::PrintJobEntry;
use crate::tile::CompositionError;

/// Produced artifact of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub locator: String,
    pub content_type: String,
}

/// Classified job failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn rendering(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rendering, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "job was cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<CompositionError> for JobFailure {
    fn from(err: CompositionError) -> Self {
        match err {
            CompositionError::TileFailed(failure) => {
                let status = failure
                    .reason
                    .status()
                    .map(|s| format!(" (status {})", s))
                    .unwrap_or_default();
                Self::new(
                    ErrorKind::Composition,
                    format!(
                        "tile {} failed after {} attempt(s){}: {}",
                        failure.uri, failure.attempts, status, failure.reason
                    ),
                )
            }
            CompositionError::Cancelled => Self::cancelled(),
            CompositionError::Internal(msg) => Self::internal(msg),
        }
    }
}

/// Executes one job.
///
/// Implementations check `cancel` at convenient points and return
/// [`JobFailure::cancelled`] once they observe it.
pub trait JobRunner: Send + Sync + 'static {
    fn run(
        &self,
        entry: &PrintJobEntry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ReportArtifact, JobFailure>> + Send;
}

/// Execution wrapper around one entry.
///
/// `call` consumes the job, so a result is produced exactly once.
pub struct PrintJob<J: JobRunner> {
    entry: PrintJobEntry,
    runner: Arc<J>,
    cancel: CancellationToken,
}

impl<J: JobRunner> PrintJob<J> {
    pub fn new(entry: PrintJobEntry, runner: Arc<J>, cancel: CancellationToken) -> Self {
        Self {
            entry,
            runner,
            cancel,
        }
    }

    pub fn entry(&self) -> &PrintJobEntry {
        &self.entry
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs the job and captures its outcome.
    pub async fn call(self) -> PrintJobResult {
        let outcome = self.runner.run(&self.entry, &self.cancel).await;
        match outcome {
            Ok(artifact) => PrintJobResult::Success {
                locator: artifact.locator,
                content_type: artifact.content_type,
            },
            Err(failure) => {
                debug!(
                    reference_id = %self.entry.reference_id,
                    kind = %failure.kind,
                    message = %failure.message,
                    "job failed"
                );
                PrintJobResult::Failure {
                    kind: failure.kind,
                    message: failure.message,
                }
            }
        }
    }
}
