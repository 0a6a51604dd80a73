use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::job::spec::JobSpec;
use crate::job::status::JobStatus;
use crate::metadata::model::ObjectType;

/// Identifier of a job in the tree.
pub type JobId = String;

/// Generates a fresh job identifier; sub-job ids carry a distinguishing prefix.
pub fn generate_job_id(is_sub_job: bool) -> JobId {
    let id = uuid::Uuid::new_v4().simple().to_string();
    if is_sub_job { format!("S_{id}") } else { id }
}

/// One persisted node of the job tree.
///
/// A job with sub-jobs has no directly-executable task of its own; its status is
/// the aggregation of its sub-jobs' statuses. A table job without partitions
/// owns a task DAG directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// `None` for root jobs.
    pub parent_id: Option<JobId>,
    pub object_type: ObjectType,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Opaque configuration blob: the submitted (or derived) job spec.
    pub spec: JobSpec,
    /// Free-text info / failure reason.
    pub info: String,
    pub has_sub_jobs: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        parent_id: Option<JobId>,
        spec: JobSpec,
        max_attempts: u32,
        has_sub_jobs: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent_id,
            object_type: spec.object_type,
            status: JobStatus::Pending,
            priority: spec.priority,
            attempts: 0,
            max_attempts,
            spec,
            info: String::new(),
            has_sub_jobs,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a status transition with the timestamp discipline.
    ///
    /// Entering `Running` stamps the start time and counts an attempt; entering
    /// a terminal state stamps the end time. Setting the current status again is
    /// a no-op.
    pub fn set_status(&mut self, status: JobStatus) {
        if self.status == status {
            return;
        }

        debug!(
            job_id = %self.id,
            from = %self.status,
            to = %status,
            "set job status"
        );

        let now = Utc::now();
        match status {
            JobStatus::Running => {
                self.started_at = Some(now);
                self.attempts += 1;
            }
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled => {
                self.ended_at = Some(now);
            }
            JobStatus::Pending => {}
        }

        self.status = status;
        self.updated_at = now;
    }

    /// Marks the record failed with a human-readable reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.set_status(JobStatus::Failed);
        self.info = reason.into();
    }

    /// Returns the record to `Pending` for another attempt, clearing the info
    /// field.
    pub fn revive(&mut self) {
        self.set_status(JobStatus::Pending);
        self.info = String::new();
        self.ended_at = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::model::SystemKind;

    fn record() -> JobRecord {
        let spec = JobSpec::table(
            SystemKind::Hive,
            SystemKind::Warehouse,
            "src_db",
            "events",
            "dst_db",
            "events",
        );
        JobRecord::new(generate_job_id(false), None, spec, 3, false)
    }

    #[test]
    fn running_counts_an_attempt_and_stamps_start() {
        let mut record = record();
        assert_eq!(record.attempts, 0);

        record.set_status(JobStatus::Running);
        assert_eq!(record.attempts, 1);
        assert!(record.started_at.is_some());
        assert!(record.ended_at.is_none());

        // Re-setting the same status must not double-count.
        record.set_status(JobStatus::Running);
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn terminal_states_stamp_end_time() {
        let mut record = record();
        record.set_status(JobStatus::Running);
        record.fail("boom");

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.info, "boom");
        assert!(record.ended_at.is_some());
    }

    #[test]
    fn revive_clears_failure_state() {
        let mut record = record();
        record.set_status(JobStatus::Running);
        record.fail("boom");

        record.revive();

        assert_eq!(record.status, JobStatus::Pending);
        assert!(record.info.is_empty());
        assert!(record.ended_at.is_none());
        // Attempts are preserved so retry budgets keep counting.
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn sub_job_ids_are_prefixed() {
        assert!(generate_job_id(true).starts_with("S_"));
        assert!(!generate_job_id(false).starts_with("S_"));
    }
}
