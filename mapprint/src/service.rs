//! High-level facade wiring configuration, registry, print runner and
//! scheduler together.
//!
//! # Example
//!
//! ```ignore
//! use mapprint::config::ConfigFile;
//! use mapprint::service::PrintService;
//!
//! let service = PrintService::from_config(&ConfigFile::load()?)?;
//! let id = service.submit(request, AccessAssertion::anonymous()).await?;
//! ```

use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::ConfigFile;
use crate::job::{
    AccessAssertion, ErrorKind, PrintJobEntry, PrintJobResult, PrintJobStatus, ReferenceId,
};
use crate::print::PrintJobRunner;
use crate::queue::CancelOutcome;
use crate::registry::{MemoryRegistry, SharedRegistry};
use crate::report::{FileReportLoader, FileReportStore, ReportError, ReportLoaders};
use crate::scheduler::{
    HealthConfig, HealthReport, JobScheduler, QueueHealthCheck, SchedulerConfig, SchedulerError,
};
use crate::tile::{
    FetchConfig, ReqwestTileFetcher, TileFetcher, TileMetricsSnapshot, TiledRasterCompositor,
    TransportError,
};

/// Errors surfaced by [`PrintService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] TransportError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// The job has not reached a terminal state yet
    #[error("job {0} has not finished")]
    NotFinished(ReferenceId),

    /// The job finished without producing a report
    #[error("job {id} produced no report ({kind}: {message})")]
    NoReport {
        id: ReferenceId,
        kind: ErrorKind,
        message: String,
    },
}

/// Runner used by [`PrintService`].
pub type ServiceRunner<F> = PrintJobRunner<F, FileReportStore>;

/// Print service built from a [`ConfigFile`].
pub struct PrintService<R: SharedRegistry = MemoryRegistry, F: TileFetcher = ReqwestTileFetcher> {
    scheduler: JobScheduler<R, ServiceRunner<F>>,
    runner: Arc<ServiceRunner<F>>,
    loaders: ReportLoaders,
    health: QueueHealthCheck,
}

impl PrintService {
    /// Builds a service with the HTTP tile fetcher and an in-process registry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &ConfigFile) -> Result<Self, ServiceError> {
        let fetcher = ReqwestTileFetcher::new(FetchConfig::from(config).request_timeout)?;
        Ok(Self::with_components(
            config,
            Arc::new(fetcher),
            Arc::new(MemoryRegistry::new()),
        ))
    }
}

impl<R: SharedRegistry, F: TileFetcher> PrintService<R, F> {
    /// Builds a service around an existing fetcher and shared registry.
    ///
    /// Instances that share `registry` and the cluster name form one cluster
    /// when `[cluster] enabled` is set.
    pub fn with_components(config: &ConfigFile, fetcher: Arc<F>, registry: Arc<R>) -> Self {
        let compositor = TiledRasterCompositor::new(fetcher, FetchConfig::from(config));
        let runner = Arc::new(
            PrintJobRunner::new(compositor, FileReportStore::new(&config.output.directory))
                .with_fail_on_error(config.tiles.fail_on_error),
        );
        let scheduler_config = SchedulerConfig::from(config);

        info!(
            output = %config.output.directory.display(),
            clustered = scheduler_config.clustered,
            "Starting print service"
        );

        let scheduler = JobScheduler::start(scheduler_config, Arc::clone(&runner), registry);
        let loaders =
            ReportLoaders::new().with_loader(FileReportLoader::within(&config.output.directory));

        Self {
            scheduler,
            runner,
            loaders,
            health: QueueHealthCheck::new(HealthConfig::from(config)),
        }
    }

    /// Replaces the loaders used by [`load_report`](Self::load_report).
    pub fn with_loaders(mut self, loaders: ReportLoaders) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn scheduler(&self) -> &JobScheduler<R, ServiceRunner<F>> {
        &self.scheduler
    }

    /// Submits a request under a generated reference id.
    pub async fn submit(
        &self,
        request: serde_json::Value,
        access_assertion: AccessAssertion,
    ) -> Result<ReferenceId, ServiceError> {
        Ok(self
            .scheduler
            .submit_request(request, access_assertion)
            .await?)
    }

    /// Submits a fully formed entry, keeping its reference id.
    pub async fn submit_entry(&self, entry: PrintJobEntry) -> Result<(), ServiceError> {
        Ok(self.scheduler.submit(entry).await?)
    }

    pub async fn status(&self, id: &ReferenceId) -> Result<PrintJobStatus, ServiceError> {
        Ok(self.scheduler.status(id).await?)
    }

    pub async fn result(&self, id: &ReferenceId) -> Result<Option<PrintJobResult>, ServiceError> {
        Ok(self.scheduler.result(id).await?)
    }

    pub async fn cancel(&self, id: &ReferenceId) -> CancelOutcome {
        self.scheduler.cancel(id).await
    }

    /// Streams the report of a successful job into `out`.
    ///
    /// Returns the number of bytes written.
    pub async fn load_report(
        &self,
        id: &ReferenceId,
        out: &mut dyn Write,
    ) -> Result<u64, ServiceError> {
        match self.result(id).await? {
            None => Err(ServiceError::NotFinished(id.clone())),
            Some(PrintJobResult::Failure { kind, message }) => Err(ServiceError::NoReport {
                id: id.clone(),
                kind,
                message,
            }),
            Some(PrintJobResult::Success { locator, .. }) => {
                Ok(self.loaders.load_report(&locator, out)?)
            }
        }
    }

    /// Samples the scheduler and evaluates it against the previous sample.
    pub async fn health(&self) -> HealthReport {
        let sample = self.scheduler.health_sample().await;
        self.health.check(sample)
    }

    pub fn tile_metrics(&self) -> TileMetricsSnapshot {
        self.runner.tile_metrics()
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
