//! Registry key layout for one cluster.
//!
//! All keys are namespaced by cluster name so several clusters can share a
//! backing store:
//!
//! | Key                         | Value                         |
//! |-----------------------------|-------------------------------|
//! | `<cluster>:available:<id>`  | serialized job entry          |
//! | `<cluster>:claimed:<id>`    | instance id of the claimer    |
//! | `<cluster>:done:<id>`       | serialized terminal record    |
//! | `<cluster>:jobs-run`        | long counter                  |
//! | `<cluster>:time-spent-ms`   | long counter                  |
//! | `<cluster>:last-executed`   | epoch millis of last finish   |

use crate::job::ReferenceId;

/// Builds registry keys for one cluster namespace.
#[derive(Debug, Clone)]
pub struct ClusterKeys {
    cluster: String,
}

impl ClusterKeys {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn available(&self, id: &ReferenceId) -> String {
        format!("{}{}", self.available_prefix(), id)
    }

    pub fn available_prefix(&self) -> String {
        format!("{}:available:", self.cluster)
    }

    pub fn claimed(&self, id: &ReferenceId) -> String {
        format!("{}{}", self.claimed_prefix(), id)
    }

    pub fn claimed_prefix(&self) -> String {
        format!("{}:claimed:", self.cluster)
    }

    pub fn done(&self, id: &ReferenceId) -> String {
        format!("{}{}", self.done_prefix(), id)
    }

    pub fn done_prefix(&self) -> String {
        format!("{}:done:", self.cluster)
    }

    pub fn jobs_run(&self) -> String {
        format!("{}:jobs-run", self.cluster)
    }

    pub fn time_spent_ms(&self) -> String {
        format!("{}:time-spent-ms", self.cluster)
    }

    pub fn last_executed(&self) -> String {
        format!("{}:last-executed", self.cluster)
    }

    /// Recovers the reference id from an `available:` key.
    pub fn id_from_available<'a>(&self, key: &'a str) -> Option<&'a str> {
        let prefix = self.available_prefix();
        key.strip_prefix(prefix.as_str()).filter(|id| !id.is_empty())
    }
}
