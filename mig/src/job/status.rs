use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MigError};
use crate::mig_error;

/// Status of a job in the migration tree.
///
/// `Pending → Running → {Succeeded, Failed, Canceled}`; `Failed` and `Canceled`
/// may go back to `Pending` through retry or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_static_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = MigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(mig_error!(
                ErrorKind::DeserializationError,
                "Unknown job status",
                other.to_string()
            )),
        }
    }
}

/// Derives a parent job's status from its sub-jobs' statuses.
///
/// A job with sub-jobs never carries a directly assigned status: all sub-jobs
/// succeeded means `Succeeded`, every sub-job terminal with at least one failure
/// means `Failed`, all canceled means `Canceled`; otherwise the tree is still in
/// motion and the parent reads `Running` (or `Pending` when nothing started).
pub fn aggregate(statuses: &[JobStatus]) -> JobStatus {
    if statuses.is_empty() {
        return JobStatus::Pending;
    }

    let all_terminal = statuses.iter().all(JobStatus::is_terminal);
    let any_failed = statuses.contains(&JobStatus::Failed);

    if statuses.iter().all(|s| *s == JobStatus::Succeeded) {
        return JobStatus::Succeeded;
    }
    if statuses.iter().all(|s| *s == JobStatus::Pending) {
        return JobStatus::Pending;
    }
    if all_terminal && any_failed {
        return JobStatus::Failed;
    }
    if all_terminal {
        // Mixed succeeded/canceled with no failure: the cancellation wins.
        return JobStatus::Canceled;
    }
    if statuses.contains(&JobStatus::Running) {
        return JobStatus::Running;
    }

    // Some terminal, some pending: work remains.
    JobStatus::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn succeeded_iff_all_succeeded() {
        assert_eq!(aggregate(&[Succeeded, Succeeded]), Succeeded);
        assert_ne!(aggregate(&[Succeeded, Running]), Succeeded);
    }

    #[test]
    fn failed_iff_all_terminal_and_any_failed() {
        assert_eq!(aggregate(&[Succeeded, Failed]), Failed);
        assert_eq!(aggregate(&[Failed, Canceled]), Failed);
        // A failure with work still in flight is not terminal yet.
        assert_eq!(aggregate(&[Failed, Running]), Running);
        assert_eq!(aggregate(&[Failed, Pending]), Pending);
    }

    #[test]
    fn canceled_when_terminal_without_failure() {
        assert_eq!(aggregate(&[Canceled, Canceled]), Canceled);
        assert_eq!(aggregate(&[Succeeded, Canceled]), Canceled);
    }

    #[test]
    fn pending_and_running_mixes() {
        assert_eq!(aggregate(&[Pending, Pending]), Pending);
        assert_eq!(aggregate(&[Pending, Running]), Running);
        assert_eq!(aggregate(&[Succeeded, Pending]), Pending);
    }

    #[test]
    fn empty_is_pending() {
        assert_eq!(aggregate(&[]), Pending);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [Pending, Running, Succeeded, Failed, Canceled] {
            assert_eq!(JobStatus::try_from(status.as_static_str()).unwrap(), status);
        }
        assert!(JobStatus::try_from("resumed").is_err());
    }
}
