//! In-process job queue.
//!
//! Single source of truth for what is waiting, running and recently
//! finished in this process. All state sits behind one coarse lock; every
//! operation is a short critical section with no awaits inside.
//!
//! ```text
//!  submit ──► waiting (FIFO) ──take──► running ──complete──► completed
//!                 │                                          (LRU cache,
//!                 └───────────── cancel ────────────────────► retention)
//! ```
//!
//! Completed results are kept in an LRU cache that is never promoted on read,
//! so eviction is oldest-first. A result is also dropped once it is older
//! than the retention window.

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::pin::pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::job::{JobState, PrintJobEntry, PrintJobResult, PrintJobStatus, ReferenceId};

/// Default retention window for finished jobs.
pub const DEFAULT_RESULT_RETENTION: Duration = Duration::from_secs(3600);

/// Default number of finished jobs kept.
pub const DEFAULT_MAX_RETAINED_RESULTS: usize = 1000;

/// Queue errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("job {0} is already waiting or running")]
    DuplicateReferenceId(ReferenceId),

    #[error("job {0} not found")]
    NotFound(ReferenceId),
}

/// Outcome of [`JobQueue::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was waiting and is now cancelled
    Cancelled(PrintJobStatus),
    /// The job is running; its cancellation flag was raised
    Signalled,
    /// The job already finished
    AlreadyFinished(JobState),
    /// Another cluster member is running the job
    RunningElsewhere,
    NotFound,
}

struct WaitingJob {
    submission_time: DateTime<Utc>,
}

struct RunningJob {
    status: PrintJobStatus,
    cancel: CancellationToken,
}

struct CompletedJob {
    status: PrintJobStatus,
    result: PrintJobResult,
    completed_at: Instant,
}

struct QueueState {
    order: VecDeque<PrintJobEntry>,
    waiting: HashMap<ReferenceId, WaitingJob>,
    running: HashMap<ReferenceId, RunningJob>,
    completed: LruCache<ReferenceId, CompletedJob>,
    closed: bool,
}

impl QueueState {
    fn completed_live(&mut self, id: &ReferenceId, retention: Duration) -> Option<&CompletedJob> {
        let expired = self
            .completed
            .peek(id)
            .map(|job| job.completed_at.elapsed() > retention)?;
        if expired {
            self.completed.pop(id);
            return None;
        }
        self.completed.peek(id)
    }
}

/// Thread-safe holder of pending, running and finished job state.
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
    retention: Duration,
}

impl JobQueue {
    /// Creates a queue keeping at most `max_retained` finished jobs for up to
    /// `retention`.
    pub fn new(retention: Duration, max_retained: usize) -> Self {
        let capacity = NonZeroUsize::new(max_retained.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                waiting: HashMap::new(),
                running: HashMap::new(),
                completed: LruCache::new(capacity),
                closed: false,
            }),
            available: Notify::new(),
            retention,
        }
    }

    /// Adds an entry to the back of the queue.
    ///
    /// A finished job with the same id is forgotten, so ids can be reused
    /// once their previous run is over.
    pub fn submit(&self, entry: PrintJobEntry) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            let id = &entry.reference_id;
            if state.waiting.contains_key(id) || state.running.contains_key(id) {
                return Err(QueueError::DuplicateReferenceId(id.clone()));
            }
            state.completed.pop(id);
            state.waiting.insert(
                id.clone(),
                WaitingJob {
                    submission_time: entry.submission_time,
                },
            );
            state.order.push_back(entry);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Removes and returns the oldest waiting entry.
    pub fn take_next(&self) -> Option<PrintJobEntry> {
        let mut state = self.state.lock();
        let entry = state.order.pop_front()?;
        state.waiting.remove(&entry.reference_id);
        Some(entry)
    }

    /// Waits for the next entry. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<PrintJobEntry> {
        loop {
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();

            if self.state.lock().closed {
                return None;
            }
            if let Some(entry) = self.take_next() {
                return Some(entry);
            }
            notified.await;
        }
    }

    /// Records that a taken entry started executing.
    pub fn mark_running(
        &self,
        entry: &PrintJobEntry,
        executed_by: Option<String>,
        cancel: CancellationToken,
    ) -> PrintJobStatus {
        let status = PrintJobStatus {
            reference_id: entry.reference_id.clone(),
            state: JobState::Running,
            submission_time: entry.submission_time,
            start_time: Some(Utc::now()),
            completion_time: None,
            error: None,
            executed_by,
        };
        self.state.lock().running.insert(
            entry.reference_id.clone(),
            RunningJob {
                status: status.clone(),
                cancel,
            },
        );
        status
    }

    /// Moves a running job to the finished cache.
    ///
    /// Returns the final status, or `None` if the job was not running.
    pub fn complete(&self, id: &ReferenceId, result: PrintJobResult) -> Option<PrintJobStatus> {
        let mut state = self.state.lock();
        let running = state.running.remove(id)?;
        let status = running.status.finish(&result);

        state.completed.push(
            id.clone(),
            CompletedJob {
                status: status.clone(),
                result,
                completed_at: Instant::now(),
            },
        );
        Some(status)
    }

    /// Records the outcome of a job this process never ran (for example a
    /// job cancelled elsewhere in the cluster).
    pub fn record_finished(&self, status: PrintJobStatus, result: PrintJobResult) {
        let mut state = self.state.lock();
        let id = status.reference_id.clone();
        if state.waiting.remove(&id).is_some() {
            state.order.retain(|e| e.reference_id != id);
        }
        state.completed.push(
            id,
            CompletedJob {
                status,
                result,
                completed_at: Instant::now(),
            },
        );
    }

    /// Cancels a waiting job, or raises the flag of a running one.
    pub fn cancel(&self, id: &ReferenceId) -> CancelOutcome {
        let mut state = self.state.lock();

        if let Some(waiting) = state.waiting.remove(id) {
            state.order.retain(|e| &e.reference_id != id);
            let result = PrintJobResult::cancelled_before_start();
            let status =
                PrintJobStatus::waiting(id.clone(), waiting.submission_time).finish(&result);
            state.completed.push(
                id.clone(),
                CompletedJob {
                    status: status.clone(),
                    result,
                    completed_at: Instant::now(),
                },
            );
            return CancelOutcome::Cancelled(status);
        }

        if let Some(running) = state.running.get(id) {
            running.cancel.cancel();
            return CancelOutcome::Signalled;
        }

        match state.completed_live(id, self.retention) {
            Some(done) => CancelOutcome::AlreadyFinished(done.status.state),
            None => CancelOutcome::NotFound,
        }
    }

    /// Current status of a job.
    pub fn status(&self, id: &ReferenceId) -> Result<PrintJobStatus, QueueError> {
        let mut state = self.state.lock();
        if let Some(waiting) = state.waiting.get(id) {
            return Ok(PrintJobStatus::waiting(id.clone(), waiting.submission_time));
        }
        if let Some(running) = state.running.get(id) {
            return Ok(running.status.clone());
        }
        state
            .completed_live(id, self.retention)
            .map(|done| done.status.clone())
            .ok_or_else(|| QueueError::NotFound(id.clone()))
    }

    /// Result of a job; `Ok(None)` while it is still waiting or running.
    pub fn result(&self, id: &ReferenceId) -> Result<Option<PrintJobResult>, QueueError> {
        let mut state = self.state.lock();
        if state.waiting.contains_key(id) || state.running.contains_key(id) {
            return Ok(None);
        }
        state
            .completed_live(id, self.retention)
            .map(|done| Some(done.result.clone()))
            .ok_or_else(|| QueueError::NotFound(id.clone()))
    }

    /// Returns true if the id is waiting, running or retained.
    pub fn contains(&self, id: &ReferenceId) -> bool {
        let mut state = self.state.lock();
        state.waiting.contains_key(id)
            || state.running.contains_key(id)
            || state.completed_live(id, self.retention).is_some()
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running.len()
    }

    pub fn retained_count(&self) -> usize {
        self.state.lock().completed.len()
    }

    /// Drops finished jobs older than the retention window, oldest first.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let mut purged = 0;
        while let Some((_, oldest)) = state.completed.peek_lru() {
            if oldest.completed_at.elapsed() <= self.retention {
                break;
            }
            state.completed.pop_lru();
            purged += 1;
        }
        purged
    }

    /// Raises the cancellation flag of every running job.
    pub fn cancel_running(&self) -> usize {
        let state = self.state.lock();
        for job in state.running.values() {
            job.cancel.cancel();
        }
        state.running.len()
    }

    /// Stops handing out entries; blocked [`JobQueue::next`] calls return.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
