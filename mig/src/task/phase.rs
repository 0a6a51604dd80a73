use std::fmt;

use serde::{Deserialize, Serialize};

/// Phases a task moves through, in order.
///
/// Not every task kind runs every phase; each task derives its own ordered step
/// plan from its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Destination object creation and partition pre-declaration.
    SchemaSetup,
    /// Bulk data movement, possibly through a staging object.
    DataTransfer,
    /// Source/destination comparison after transfer.
    Verification,
    /// Best-effort removal of staging objects.
    Cleanup,
}

impl TaskPhase {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            TaskPhase::SchemaSetup => "schema_setup",
            TaskPhase::DataTransfer => "data_transfer",
            TaskPhase::Verification => "verification",
            TaskPhase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

impl TryFrom<&str> for TaskPhase {
    type Error = crate::error::MigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "schema_setup" => Ok(TaskPhase::SchemaSetup),
            "data_transfer" => Ok(TaskPhase::DataTransfer),
            "verification" => Ok(TaskPhase::Verification),
            "cleanup" => Ok(TaskPhase::Cleanup),
            other => Err(crate::mig_error!(
                crate::error::ErrorKind::DeserializationError,
                "Unknown task phase",
                other.to_string()
            )),
        }
    }
}

/// Fine-grained resumption point within a phase, persisted for crash recovery.
///
/// `Doing` is written before the step's external call, `Done` or `Failed`
/// after. On restart a `Done` step is skipped while `Doing` and `Failed` re-run
/// the step from its start, which is safe because every step operation is
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Doing,
    Done,
    Failed,
}

impl StepStatus {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            StepStatus::Doing => "doing",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

impl TryFrom<&str> for StepStatus {
    type Error = crate::error::MigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "doing" => Ok(StepStatus::Doing),
            "done" => Ok(StepStatus::Done),
            "failed" => Ok(StepStatus::Failed),
            other => Err(crate::mig_error!(
                crate::error::ErrorKind::DeserializationError,
                "Unknown step status",
                other.to_string()
            )),
        }
    }
}

/// Latest persisted sub-status of one task, keyed by (job id, task key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub phase: TaskPhase,
    pub step: String,
    pub status: StepStatus,
}

impl TaskCheckpoint {
    pub fn new(phase: TaskPhase, step: impl Into<String>, status: StepStatus) -> Self {
        Self {
            phase,
            step: step.into(),
            status,
        }
    }
}
