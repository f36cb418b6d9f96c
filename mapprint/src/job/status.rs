//! Job state, status and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ReferenceId;

/// Scheduler-observed job state.
///
/// Transitions are monotonic: `Waiting -> Running -> terminal`, or
/// `Waiting -> Cancelled` for jobs cancelled before they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Waiting,
    Running,
    DoneSuccess,
    DoneFailure,
    Cancelled,
}

impl JobState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DoneSuccess | Self::DoneFailure | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` keeps the order.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            Self::Waiting => next != Self::Waiting,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::DoneSuccess => "done-success",
            Self::DoneFailure => "done-failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    AccessDenied,
    InvalidRequest,
    Composition,
    Rendering,
    Storage,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access-denied",
            Self::InvalidRequest => "invalid-request",
            Self::Composition => "composition",
            Self::Rendering => "rendering",
            Self::Storage => "storage",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum PrintJobResult {
    Success {
        /// URI of the produced artifact
        locator: String,
        content_type: String,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl PrintJobResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Result recorded for a job cancelled while still waiting.
    pub fn cancelled_before_start() -> Self {
        Self::failure(ErrorKind::Cancelled, "cancelled before start")
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// State a job ends in with this result.
    pub fn terminal_state(&self) -> JobState {
        match self {
            Self::Success { .. } => JobState::DoneSuccess,
            Self::Failure {
                kind: ErrorKind::Cancelled,
                ..
            } => JobState::Cancelled,
            Self::Failure { .. } => JobState::DoneFailure,
        }
    }

    /// One-line error summary, for failures.
    pub fn error_summary(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, message } => Some(format!("{}: {}", kind, message)),
        }
    }
}

/// Queryable job status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJobStatus {
    pub reference_id: ReferenceId,
    pub state: JobState,
    pub submission_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    /// Failure summary for `done-failure` and `cancelled`
    pub error: Option<String>,
    /// Instance that executed (or is executing) the job
    pub executed_by: Option<String>,
}

impl PrintJobStatus {
    pub fn waiting(reference_id: ReferenceId, submission_time: DateTime<Utc>) -> Self {
        Self {
            reference_id,
            state: JobState::Waiting,
            submission_time,
            start_time: None,
            completion_time: None,
            error: None,
            executed_by: None,
        }
    }

    /// Moves the status to the terminal state matching `result`.
    pub fn finish(mut self, result: &PrintJobResult) -> Self {
        self.state = result.terminal_state();
        self.completion_time = Some(Utc::now());
        self.error = result.error_summary();
        self
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wall-clock execution time, once the job has both started and finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.completion_time? - self.start_time?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        use JobState::*;
        assert!(Waiting.can_transition_to(Running));
        assert!(Waiting.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(DoneSuccess));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Waiting));
        assert!(!DoneSuccess.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(DoneFailure));
    }

    #[test]
    fn test_result_terminal_state() {
        let ok = PrintJobResult::Success {
            locator: "file:///tmp/a.png".into(),
            content_type: "image/png".into(),
        };
        assert_eq!(ok.terminal_state(), JobState::DoneSuccess);
        assert!(ok.error_summary().is_none());

        let cancelled = PrintJobResult::failure(ErrorKind::Cancelled, "stopped");
        assert_eq!(cancelled.terminal_state(), JobState::Cancelled);

        let failed = PrintJobResult::failure(ErrorKind::Timeout, "exceeded 5s");
        assert_eq!(failed.terminal_state(), JobState::DoneFailure);
        assert_eq!(failed.error_summary().unwrap(), "timeout: exceeded 5s");
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&JobState::DoneFailure).unwrap(),
            "\"done-failure\""
        );
        let result = PrintJobResult::failure(ErrorKind::AccessDenied, "nope");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["kind"], "access-denied");
    }
}
