//! Print job data model.
//!
//! - [`PrintJobEntry`] - immutable submission: id, request, time, assertion
//! - [`PrintJobStatus`] - queryable state with monotonic transitions
//! - [`PrintJobResult`] - terminal outcome, created exactly once
//! - [`PrintJob`] - execution wrapper that turns a [`JobRunner`] call into a
//!   result
//!
//! The request payload is opaque JSON to everything in this module; only the
//! runner interprets it.

mod id;
mod runner;
mod status;

pub use id::{InvalidReferenceId, ReferenceId};
pub use runner::{JobFailure, JobRunner, PrintJob, ReportArtifact};
pub use status::{ErrorKind, JobState, PrintJobResult, PrintJobStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability token checked before rendering. Opaque to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessAssertion(pub serde_json::Value);

impl AccessAssertion {
    /// An assertion carrying no claims.
    pub fn anonymous() -> Self {
        Self(serde_json::Value::Null)
    }
}

/// Immutable unit of work.
///
/// Serializable so it can be advertised to other cluster members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJobEntry {
    pub reference_id: ReferenceId,
    /// Request payload consumed by the job runner
    pub request: serde_json::Value,
    pub submission_time: DateTime<Utc>,
    pub access_assertion: AccessAssertion,
}

impl PrintJobEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(
        reference_id: ReferenceId,
        request: serde_json::Value,
        access_assertion: AccessAssertion,
    ) -> Self {
        Self {
            reference_id,
            request,
            submission_time: Utc::now(),
            access_assertion,
        }
    }
}
