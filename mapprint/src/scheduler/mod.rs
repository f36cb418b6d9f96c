//! Bounded-parallelism job scheduler with optional cluster coordination.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!  submit ──────────► │ JobQueue (FIFO)                              │
//!    │                └──────────┬───────────────────────────────────┘
//!    │ advertise                 │ next()
//!    ▼                           ▼
//! ┌──────────────┐     ┌─────────────────────┐      ┌───────────────┐
//! │  Shared      │◄────│ worker × N          │─────►│  JobRunner    │
//! │  registry    │claim│ claim → run → finish│      │ (PrintJob)    │
//! └──────┬───────┘     └─────────────────────┘      └───────────────┘
//!        │ available:*            ▲
//!        └──────► discovery loop ─┘ (enqueues jobs advertised elsewhere)
//! ```
//!
//! Each worker runs one job at a time, so at most `max_concurrent_jobs` jobs
//! execute in this process. In clustered mode a job runs only on the
//! instance that wins its claim; see [`cluster`] for the protocol.
//!
//! If the registry is unavailable, clustered coordination degrades to
//! process-local behaviour: submissions are still accepted and the claim
//! step is skipped.

pub mod cluster;
mod config;
mod counters;
pub mod health;

pub use cluster::{ClaimOutcome, ClusterCoordinator, ClusterCounters, DoneRecord};
pub use config::{
    default_max_concurrent_jobs, ClusterConfig, SchedulerConfig, DEFAULT_AVAILABILITY_TTL,
    DEFAULT_CLAIM_TTL, DEFAULT_CLUSTER_NAME, DEFAULT_DISCOVERY_INTERVAL,
};
pub use counters::ExecutionCounters;
pub use health::{
    evaluate, HealthConfig, HealthReport, HealthSample, HealthStatus, QueueHealthCheck,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{
    AccessAssertion, ErrorKind, JobRunner, JobState, PrintJob, PrintJobEntry, PrintJobResult,
    PrintJobStatus, ReferenceId,
};
use crate::queue::{CancelOutcome, JobQueue, QueueError};
use crate::registry::{MemoryRegistry, RegistryError, SharedRegistry};

/// Scheduler errors surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("job {0} is already waiting or running")]
    DuplicateReferenceId(ReferenceId),

    #[error("job {0} not found")]
    NotFound(ReferenceId),

    #[error("invalid job entry: {0}")]
    InvalidEntry(String),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::DuplicateReferenceId(id) => Self::DuplicateReferenceId(id),
            QueueError::NotFound(id) => Self::NotFound(id),
        }
    }
}

struct Inner<R: SharedRegistry, J: JobRunner> {
    config: SchedulerConfig,
    queue: JobQueue,
    runner: Arc<J>,
    cluster: Option<ClusterCoordinator<R>>,
    counters: ExecutionCounters,
    accepting: AtomicBool,
    shutdown: CancellationToken,
}

/// Executes print jobs with bounded parallelism.
pub struct JobScheduler<R: SharedRegistry, J: JobRunner> {
    inner: Arc<Inner<R, J>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: JobRunner> JobScheduler<MemoryRegistry, J> {
    /// Starts a scheduler that never coordinates with other instances.
    pub fn start_local(config: SchedulerConfig, runner: Arc<J>) -> Self {
        let config = SchedulerConfig {
            clustered: false,
            ..config
        };
        Self::start(config, runner, Arc::new(MemoryRegistry::new()))
    }
}

impl<R: SharedRegistry, J: JobRunner> JobScheduler<R, J> {
    /// Spawns the worker pool and the background loop.
    ///
    /// Must be called from within a tokio runtime. `registry` is only used in
    /// clustered mode.
    pub fn start(config: SchedulerConfig, runner: Arc<J>, registry: Arc<R>) -> Self {
        let cluster = config.clustered.then(|| {
            ClusterCoordinator::new(registry, config.cluster.clone(), config.result_retention)
        });
        let workers = config.max_concurrent_jobs.max(1);

        info!(
            workers,
            clustered = config.clustered,
            instance = %config.cluster.instance_id,
            "Starting job scheduler"
        );

        let inner = Arc::new(Inner {
            queue: JobQueue::new(config.result_retention, config.max_retained_results),
            runner,
            cluster,
            counters: ExecutionCounters::new(),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            config,
        });

        let mut tasks = Vec::with_capacity(workers + 1);
        for slot in 0..workers {
            let inner = Arc::clone(&inner);
            tasks.push(tokio::spawn(async move { inner.worker_loop(slot).await }));
        }
        {
            let inner = Arc::clone(&inner);
            tasks.push(tokio::spawn(async move { inner.background_loop().await }));
        }

        Self {
            inner,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.config.cluster.instance_id
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Accepts a job. Returns as soon as the entry is queued.
    pub async fn submit(&self, entry: PrintJobEntry) -> Result<(), SchedulerError> {
        if !self.is_accepting() {
            return Err(SchedulerError::ShuttingDown);
        }
        if !entry.request.is_object() {
            return Err(SchedulerError::InvalidEntry(format!(
                "request of job {} must be a JSON object",
                entry.reference_id
            )));
        }

        if let Some(cluster) = &self.inner.cluster {
            if let Err(e) = cluster.advertise(&entry).await {
                warn!(
                    reference_id = %entry.reference_id,
                    error = %e,
                    "Could not advertise job; it will only run locally"
                );
            }
        }

        let id = entry.reference_id.clone();
        self.inner.queue.submit(entry)?;
        debug!(reference_id = %id, "job submitted");
        Ok(())
    }

    /// Submits a request under a freshly generated reference id.
    pub async fn submit_request(
        &self,
        request: serde_json::Value,
        access_assertion: AccessAssertion,
    ) -> Result<ReferenceId, SchedulerError> {
        let entry = PrintJobEntry::new(ReferenceId::generate(), request, access_assertion);
        let id = entry.reference_id.clone();
        self.submit(entry).await?;
        Ok(id)
    }

    /// Current status.
    ///
    /// In clustered mode a job that is only waiting here, or that finished
    /// here before being resubmitted elsewhere, reports the cluster's view.
    pub async fn status(&self, id: &ReferenceId) -> Result<PrintJobStatus, SchedulerError> {
        self.view(id).await.map(|(status, _)| status)
    }

    /// Result of a finished job; `Ok(None)` while it is pending.
    pub async fn result(&self, id: &ReferenceId) -> Result<Option<PrintJobResult>, SchedulerError> {
        self.view(id).await.map(|(_, result)| result)
    }

    async fn view(
        &self,
        id: &ReferenceId,
    ) -> Result<(PrintJobStatus, Option<PrintJobResult>), SchedulerError> {
        let local = match self.inner.queue.status(id) {
            Ok(status) => Some(status),
            Err(QueueError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let needs_cluster = match &local {
            None => true,
            Some(status) => status.state != JobState::Running,
        };
        let remote = if needs_cluster {
            self.inner.remote_status(id).await
        } else {
            None
        };

        match (local, remote) {
            (Some(local), Some((remote, result))) if supersedes(&remote, &local) => {
                Ok((remote, result))
            }
            (Some(local), _) => {
                let result = self.inner.queue.result(id).unwrap_or(None);
                Ok((local, result))
            }
            (None, Some(found)) => Ok(found),
            (None, None) => Err(SchedulerError::NotFound(id.clone())),
        }
    }

    /// Cancels a waiting job, or raises the cancellation flag of a running one.
    ///
    /// In clustered mode a waiting job is cancelled only after this instance
    /// wins its claim; if another instance holds it the job is left alone and
    /// [`CancelOutcome::RunningElsewhere`] is returned.
    pub async fn cancel(&self, id: &ReferenceId) -> CancelOutcome {
        let Some(cluster) = &self.inner.cluster else {
            return self.inner.queue.cancel(id);
        };

        match self.inner.queue.status(id) {
            Ok(status) if status.state == JobState::Waiting => {
                match self.inner.cancel_claimed(cluster, status).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(reference_id = %id, error = %e, "Registry unavailable; cancelling locally");
                        self.inner.queue.cancel(id)
                    }
                }
            }
            Ok(status) if status.state == JobState::Running => self.inner.queue.cancel(id),
            Ok(_) => match self.inner.cancel_remote(cluster, id).await {
                CancelOutcome::NotFound => self.inner.queue.cancel(id),
                outcome => outcome,
            },
            Err(_) => self.inner.cancel_remote(cluster, id).await,
        }
    }

    /// Waiting jobs, cluster-wide when clustered.
    pub async fn waiting_jobs_count(&self) -> usize {
        if let Some(cluster) = &self.inner.cluster {
            match cluster.waiting_count().await {
                Ok(count) => return count,
                Err(e) => warn!(error = %e, "Cluster waiting count unavailable"),
            }
        }
        self.inner.queue.waiting_count()
    }

    /// Jobs running in this process.
    pub fn running_jobs_count(&self) -> usize {
        self.inner.queue.running_count()
    }

    /// Finish time of the most recent job, cluster-wide when clustered.
    pub async fn last_executed_timestamp(&self) -> Option<DateTime<Utc>> {
        match self.inner.cluster_counters().await {
            Some(counters) => counters.last_executed(),
            None => self.inner.counters.last_executed(),
        }
    }

    /// Jobs run so far, cluster-wide when clustered.
    pub async fn jobs_run_count(&self) -> u64 {
        match self.inner.cluster_counters().await {
            Some(counters) => counters.jobs_run,
            None => self.inner.counters.jobs_run(),
        }
    }

    /// Mean execution time, cluster-wide when clustered.
    pub async fn average_time_spent_running(&self) -> Option<Duration> {
        match self.inner.cluster_counters().await {
            Some(counters) => counters::average(
                Duration::from_millis(counters.time_spent_ms),
                counters.jobs_run,
            ),
            None => self.inner.counters.average_time_spent(),
        }
    }

    /// Counters of jobs executed by this instance only.
    pub fn local_counters(&self) -> &ExecutionCounters {
        &self.inner.counters
    }

    /// Snapshot for [`health::evaluate`].
    pub async fn health_sample(&self) -> HealthSample {
        let (jobs_run, last_executed) = match self.inner.cluster_counters().await {
            Some(counters) => (counters.jobs_run, counters.last_executed()),
            None => (
                self.inner.counters.jobs_run(),
                self.inner.counters.last_executed(),
            ),
        };
        HealthSample {
            taken_at: Utc::now(),
            waiting: self.waiting_jobs_count().await,
            running: self.running_jobs_count(),
            jobs_run,
            last_executed,
        }
    }

    /// Stops accepting work and waits for the workers to exit.
    ///
    /// Jobs still waiting stay queued (and advertised, in clustered mode).
    /// Running jobs finish, or are cancelled when
    /// `cancel_running_on_shutdown` is set.
    pub async fn shutdown(&self) {
        if !self.inner.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(instance = %self.instance_id(), "Shutting down job scheduler");

        self.inner.queue.close();
        if self.inner.config.cancel_running_on_shutdown {
            let cancelled = self.inner.queue.cancel_running();
            if cancelled > 0 {
                info!(cancelled, "Cancelling running jobs");
            }
        }
        self.inner.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler task panicked");
            }
        }
        info!("Job scheduler stopped");
    }
}

impl<R: SharedRegistry, J: JobRunner> Drop for JobScheduler<R, J> {
    fn drop(&mut self) {
        self.inner.accepting.store(false, Ordering::Release);
        self.inner.queue.close();
        self.inner.shutdown.cancel();
    }
}

impl<R: SharedRegistry, J: JobRunner> Inner<R, J> {
    async fn worker_loop(&self, slot: usize) {
        while let Some(entry) = self.queue.next().await {
            self.process(entry).await;
        }
        debug!(slot, "worker stopped");
    }

    async fn background_loop(&self) {
        let period = match &self.cluster {
            Some(cluster) => cluster.config().discovery_interval,
            None => self.config.housekeeping_interval,
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let purged = self.queue.purge_expired();
            if purged > 0 {
                debug!(purged, "purged expired results");
            }
            if let Some(cluster) = &self.cluster {
                self.discover(cluster).await;
            }
        }
    }

    /// Enqueues jobs advertised by other instances.
    async fn discover(&self, cluster: &ClusterCoordinator<R>) {
        let entries = match cluster.discover().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Job discovery failed");
                return;
            }
        };
        for entry in entries {
            if self.queue.contains(&entry.reference_id) {
                continue;
            }
            let id = entry.reference_id.clone();
            match self.queue.submit(entry) {
                Ok(()) => debug!(reference_id = %id, "discovered job"),
                Err(e) => debug!(reference_id = %id, error = %e, "skipped discovered job"),
            }
        }
    }

    async fn process(&self, entry: PrintJobEntry) {
        let id = entry.reference_id.clone();

        if let Some(cluster) = &self.cluster {
            match cluster.claim(&id, entry.submission_time).await {
                Ok(ClaimOutcome::Won) => debug!(reference_id = %id, "claim won"),
                Ok(ClaimOutcome::Lost) => {
                    debug!(reference_id = %id, "claim lost; job runs elsewhere");
                    return;
                }
                Ok(ClaimOutcome::AlreadyDone(record)) => {
                    debug!(reference_id = %id, "job already finished elsewhere");
                    if let Some(record) = record {
                        self.queue.record_finished(record.status, record.result);
                    }
                    return;
                }
                Err(e) => warn!(
                    reference_id = %id,
                    error = %e,
                    "Registry unavailable; running job without a claim"
                ),
            }
        }

        let cancel = CancellationToken::new();
        self.queue
            .mark_running(&entry, Some(self.config.cluster.instance_id.clone()), cancel.clone());
        info!(reference_id = %id, "job started");

        let started = Instant::now();
        let job = PrintJob::new(entry, Arc::clone(&self.runner), cancel.clone());
        let result = self.execute(job, &id, &cancel).await;
        let elapsed = started.elapsed();

        self.counters.record(elapsed, Utc::now());
        let Some(status) = self.queue.complete(&id, result.clone()) else {
            warn!(reference_id = %id, "finished job was not tracked as running");
            return;
        };
        info!(
            reference_id = %id,
            state = %status.state,
            elapsed_ms = elapsed.as_millis() as u64,
            "job finished"
        );

        if let Some(cluster) = &self.cluster {
            if let Err(e) = cluster.finish(&status, &result, elapsed).await {
                warn!(reference_id = %id, error = %e, "Could not publish job completion");
            }
        }
    }

    /// Runs the job on its own task, enforcing the timeout and keeping the
    /// claim warm.
    async fn execute(
        &self,
        job: PrintJob<J>,
        id: &ReferenceId,
        cancel: &CancellationToken,
    ) -> PrintJobResult {
        let mut handle = tokio::spawn(job.call());
        let deadline = self.config.job_timeout.map(|timeout| Instant::now() + timeout);

        let refresh = self.config.cluster.claim_refresh_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + refresh, refresh);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                joined = &mut handle => return joined_result(id, joined),
                _ = sleep_until(deadline) => {
                    cancel.cancel();
                    handle.abort();
                    let limit = self.config.job_timeout.unwrap_or_default();
                    warn!(reference_id = %id, timeout_ms = limit.as_millis() as u64, "job timed out");
                    return PrintJobResult::failure(
                        ErrorKind::Timeout,
                        format!("job exceeded its {}ms time limit", limit.as_millis()),
                    );
                }
                _ = heartbeat.tick(), if self.cluster.is_some() => {
                    self.keep_claim_warm(id).await;
                }
            }
        }
    }

    async fn keep_claim_warm(&self, id: &ReferenceId) {
        let Some(cluster) = &self.cluster else {
            return;
        };
        match cluster.refresh_claim(id).await {
            Ok(true) => {}
            Ok(false) => warn!(reference_id = %id, "Claim lost while job is running"),
            Err(e) => warn!(reference_id = %id, error = %e, "Could not refresh claim"),
        }
    }

    async fn cancel_remote(&self, cluster: &ClusterCoordinator<R>, id: &ReferenceId) -> CancelOutcome {
        let status = match cluster.status_of(id).await {
            Ok(Some((status, _))) => status,
            Ok(None) => return CancelOutcome::NotFound,
            Err(e) => {
                warn!(reference_id = %id, error = %e, "Cluster status unavailable");
                return CancelOutcome::NotFound;
            }
        };
        match status.state {
            JobState::Waiting => {}
            JobState::Running => return CancelOutcome::RunningElsewhere,
            state => return CancelOutcome::AlreadyFinished(state),
        }

        match self.cancel_claimed(cluster, status).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(reference_id = %id, error = %e, "Could not cancel job in the cluster");
                CancelOutcome::NotFound
            }
        }
    }

    /// Cancels a waiting job while holding its claim.
    ///
    /// Holding the claim keeps every instance from starting the job while
    /// the terminal record is written.
    async fn cancel_claimed(
        &self,
        cluster: &ClusterCoordinator<R>,
        status: PrintJobStatus,
    ) -> Result<CancelOutcome, RegistryError> {
        let id = status.reference_id.clone();
        match cluster.claim(&id, status.submission_time).await? {
            ClaimOutcome::Won => {}
            ClaimOutcome::Lost => {
                // A local worker may have claimed it between the status read and now.
                return Ok(match self.queue.status(&id) {
                    Ok(local) if local.state == JobState::Running => self.queue.cancel(&id),
                    _ => CancelOutcome::RunningElsewhere,
                });
            }
            ClaimOutcome::AlreadyDone(Some(record)) => {
                let state = record.status.state;
                self.queue.record_finished(record.status, record.result);
                return Ok(CancelOutcome::AlreadyFinished(state));
            }
            ClaimOutcome::AlreadyDone(None) => return Ok(CancelOutcome::NotFound),
        }

        let result = PrintJobResult::cancelled_before_start();
        let status = status.finish(&result);
        let published = cluster.publish_done(&status, &result).await;
        if let Err(e) = cluster.release(&id).await {
            warn!(reference_id = %id, error = %e, "Could not release claim");
        }
        published?;

        self.queue.record_finished(status.clone(), result);
        info!(reference_id = %id, "job cancelled");
        Ok(CancelOutcome::Cancelled(status))
    }

    async fn remote_status(
        &self,
        id: &ReferenceId,
    ) -> Option<(PrintJobStatus, Option<PrintJobResult>)> {
        let cluster = self.cluster.as_ref()?;
        match cluster.status_of(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(reference_id = %id, error = %e, "Cluster status unavailable");
                None
            }
        }
    }

    async fn cluster_counters(&self) -> Option<ClusterCounters> {
        let cluster = self.cluster.as_ref()?;
        match cluster.counters().await {
            Ok(counters) => Some(counters),
            Err(e) => {
                warn!(error = %e, "Cluster counters unavailable");
                None
            }
        }
    }
}

/// Whether the cluster's view of a job replaces the local one.
fn supersedes(remote: &PrintJobStatus, local: &PrintJobStatus) -> bool {
    if remote.submission_time != local.submission_time {
        return remote.submission_time > local.submission_time;
    }
    local.state == JobState::Waiting && remote.state != JobState::Waiting
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn joined_result(id: &ReferenceId, joined: Result<PrintJobResult, JoinError>) -> PrintJobResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(reference_id = %id, panic = %message, "job panicked");
            PrintJobResult::failure(ErrorKind::Internal, format!("job panicked: {}", message))
        }
        Err(e) => PrintJobResult::failure(ErrorKind::Internal, format!("job task failed: {}", e)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
