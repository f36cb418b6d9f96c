//! Cooperative dequeue across scheduler instances.
//!
//! Instances never talk to each other directly. Everything goes through the
//! shared registry:
//!
//! 1. `submit` writes `available:<id>` (the serialized entry).
//! 2. Every instance polls `available:` and enqueues entries it does not
//!    know that are neither claimed nor done.
//! 3. Before running, an instance writes `claimed:<id>` with set-if-absent.
//!    Only the winner runs; it then checks `done:<id>` in case the job
//!    finished between discovery and claim. A terminal record whose
//!    submission time differs from the claimed entry belongs to an earlier
//!    run of a reused id and is dropped.
//! 4. While running, the winner re-reads its claim every `claim_ttl / 3`,
//!    which keeps it warm. A crashed winner stops refreshing, the claim
//!    expires and the job becomes claimable again.
//! 5. On finish the winner writes `done:<id>` *before* deleting the claim
//!    and the availability marker, so a late claimer always sees it.
//!
//! Listings never refresh TTLs, so discovery and status queries do not keep
//! a dead instance's claim alive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::ClusterConfig;
use super::counters::epoch_millis_to_datetime;
use crate::job::{JobState, PrintJobEntry, PrintJobResult, PrintJobStatus, ReferenceId};
use crate::registry::{ClusterKeys, RegistryError, RegistryValue, SharedRegistry};

/// Terminal record published to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneRecord {
    pub status: PrintJobStatus,
    pub result: PrintJobResult,
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This instance holds the claim and must run the job
    Won,
    /// Another instance holds the claim
    Lost,
    /// The job already finished elsewhere
    AlreadyDone(Option<DoneRecord>),
}

/// Cluster-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterCounters {
    pub jobs_run: u64,
    pub time_spent_ms: u64,
    pub last_executed_ms: Option<i64>,
}

impl ClusterCounters {
    pub fn last_executed(&self) -> Option<DateTime<Utc>> {
        self.last_executed_ms.and_then(epoch_millis_to_datetime)
    }
}

/// Registry-backed coordination for one scheduler instance.
pub struct ClusterCoordinator<R: SharedRegistry> {
    registry: Arc<R>,
    keys: ClusterKeys,
    config: ClusterConfig,
    retention: Duration,
}

impl<R: SharedRegistry> ClusterCoordinator<R> {
    pub fn new(registry: Arc<R>, config: ClusterConfig, retention: Duration) -> Self {
        Self {
            registry,
            keys: ClusterKeys::new(config.name.clone()),
            config,
            retention,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Advertises a job so other instances can discover it.
    ///
    /// A terminal record left by an earlier run of the same id is removed
    /// first, otherwise it would hide the new run from discovery.
    pub async fn advertise(&self, entry: &PrintJobEntry) -> Result<(), RegistryError> {
        self.drop_earlier_run(&entry.reference_id, entry.submission_time)
            .await?;
        let value = RegistryValue::encode(entry)?;
        let fresh = self
            .registry
            .set_if_absent(
                &self.keys.available(&entry.reference_id),
                value,
                self.config.availability_ttl,
            )
            .await?;
        if !fresh {
            debug!(reference_id = %entry.reference_id, "job already advertised");
        }
        Ok(())
    }

    /// Tries to take exclusive responsibility for the run of `id` submitted
    /// at `submission_time`.
    pub async fn claim(
        &self,
        id: &ReferenceId,
        submission_time: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RegistryError> {
        let claim_key = self.keys.claimed(id);
        let won = self
            .registry
            .set_if_absent(
                &claim_key,
                RegistryValue::Text(self.config.instance_id.clone()),
                self.config.claim_ttl,
            )
            .await?;
        if !won {
            return Ok(ClaimOutcome::Lost);
        }

        if self.drop_earlier_run(id, submission_time).await? {
            return Ok(ClaimOutcome::Won);
        }
        if let Some(done) = self.registry.get(&self.keys.done(id)).await? {
            self.registry.delete(&claim_key).await?;
            return Ok(ClaimOutcome::AlreadyDone(done.decode().ok()));
        }
        Ok(ClaimOutcome::Won)
    }

    /// Deletes `done:<id>` if it records a run submitted at another time.
    ///
    /// Returns true if a record was deleted.
    async fn drop_earlier_run(
        &self,
        id: &ReferenceId,
        submission_time: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let done_key = self.keys.done(id);
        let Some(value) = self.registry.get(&done_key).await? else {
            return Ok(false);
        };
        match value.decode::<DoneRecord>() {
            Ok(record) if record.status.submission_time != submission_time => {
                debug!(reference_id = %id, "dropping terminal record of an earlier run");
                self.registry.delete(&done_key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Keeps this instance's claim warm.
    ///
    /// Returns false if the claim expired or now belongs to someone else.
    pub async fn refresh_claim(&self, id: &ReferenceId) -> Result<bool, RegistryError> {
        let holder = self.registry.get(&self.keys.claimed(id)).await?;
        Ok(matches!(holder, Some(RegistryValue::Text(ref owner)) if *owner == self.config.instance_id))
    }

    /// Publishes a terminal record and updates the cluster counters.
    pub async fn finish(
        &self,
        status: &PrintJobStatus,
        result: &PrintJobResult,
        elapsed: Duration,
    ) -> Result<(), RegistryError> {
        let id = &status.reference_id;
        self.publish_done(status, result).await?;
        self.registry.delete(&self.keys.claimed(id)).await?;

        self.registry
            .increment_long(&self.keys.jobs_run(), 1)
            .await?;
        self.registry
            .increment_long(&self.keys.time_spent_ms(), elapsed.as_millis() as i64)
            .await?;
        self.registry
            .put(
                &self.keys.last_executed(),
                RegistryValue::Long(Utc::now().timestamp_millis()),
            )
            .await?;
        Ok(())
    }

    /// Writes `done:<id>` and withdraws the availability marker.
    pub async fn publish_done(
        &self,
        status: &PrintJobStatus,
        result: &PrintJobResult,
    ) -> Result<(), RegistryError> {
        let id = &status.reference_id;
        let record = DoneRecord {
            status: status.clone(),
            result: result.clone(),
        };
        self.registry
            .put_with_ttl(
                &self.keys.done(id),
                RegistryValue::encode(&record)?,
                self.retention,
            )
            .await?;
        self.registry.delete(&self.keys.available(id)).await?;
        Ok(())
    }

    /// Releases a claim without finishing (used when cancelling a job
    /// another instance advertised).
    pub async fn release(&self, id: &ReferenceId) -> Result<(), RegistryError> {
        self.registry.delete(&self.keys.claimed(id)).await?;
        Ok(())
    }

    pub async fn done_record(&self, id: &ReferenceId) -> Result<Option<DoneRecord>, RegistryError> {
        match self.registry.get(&self.keys.done(id)).await? {
            Some(value) => Ok(Some(value.decode()?)),
            None => Ok(None),
        }
    }

    /// Entries advertised in the cluster that are neither claimed nor done.
    pub async fn discover(&self) -> Result<Vec<PrintJobEntry>, RegistryError> {
        let pending = self.pending_ids().await?;
        let mut entries = Vec::with_capacity(pending.len());
        for id in pending {
            let Ok(reference_id) = ReferenceId::new(id.as_str()) else {
                continue;
            };
            let Some(value) = self.registry.get(&self.keys.available(&reference_id)).await? else {
                continue;
            };
            match value.decode::<PrintJobEntry>() {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(reference_id = %id, error = %e, "ignoring malformed availability marker")
                }
            }
        }
        entries.sort_by_key(|e| e.submission_time);
        Ok(entries)
    }

    /// Number of jobs waiting anywhere in the cluster.
    pub async fn waiting_count(&self) -> Result<usize, RegistryError> {
        Ok(self.pending_ids().await?.len())
    }

    /// Cluster view of a job this instance does not track.
    pub async fn status_of(
        &self,
        id: &ReferenceId,
    ) -> Result<Option<(PrintJobStatus, Option<PrintJobResult>)>, RegistryError> {
        let done = self.done_record(id).await?;
        let entry = match self.registry.get(&self.keys.available(id)).await? {
            Some(value) => Some(value.decode::<PrintJobEntry>()?),
            None => None,
        };

        let entry = match (done, entry) {
            (Some(record), Some(entry))
                if record.status.submission_time != entry.submission_time =>
            {
                entry
            }
            (Some(record), _) => return Ok(Some((record.status, Some(record.result)))),
            (None, Some(entry)) => entry,
            (None, None) => return Ok(None),
        };
        let mut status = PrintJobStatus::waiting(entry.reference_id, entry.submission_time);

        let claim_key = self.keys.claimed(id);
        let claimed = self
            .registry
            .keys_with_prefix(&claim_key)
            .await?
            .iter()
            .any(|k| *k == claim_key);
        if claimed {
            status.state = JobState::Running;
        }
        Ok(Some((status, None)))
    }

    pub async fn counters(&self) -> Result<ClusterCounters, RegistryError> {
        let jobs_run = self.read_long(&self.keys.jobs_run()).await?;
        let time_spent_ms = self.read_long(&self.keys.time_spent_ms()).await?;
        let last_executed_ms = self
            .registry
            .get(&self.keys.last_executed())
            .await?
            .and_then(|v| v.as_i64());
        Ok(ClusterCounters {
            jobs_run: jobs_run.max(0) as u64,
            time_spent_ms: time_spent_ms.max(0) as u64,
            last_executed_ms,
        })
    }

    async fn read_long(&self, key: &str) -> Result<i64, RegistryError> {
        Ok(self
            .registry
            .get(key)
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    async fn pending_ids(&self) -> Result<Vec<String>, RegistryError> {
        let available_prefix = self.keys.available_prefix();
        let claimed_prefix = self.keys.claimed_prefix();
        let done_prefix = self.keys.done_prefix();

        let claimed: HashSet<String> = self
            .registry
            .keys_with_prefix(&claimed_prefix)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(claimed_prefix.as_str()).map(str::to_string))
            .collect();
        let done: HashSet<String> = self
            .registry
            .keys_with_prefix(&done_prefix)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(done_prefix.as_str()).map(str::to_string))
            .collect();

        Ok(self
            .registry
            .keys_with_prefix(&available_prefix)
            .await?
            .iter()
            .filter_map(|k| self.keys.id_from_available(k))
            .filter(|id| !claimed.contains(*id) && !done.contains(*id))
            .map(str::to_string)
            .collect())
    }
}
