use std::future::Future;

use crate::error::MigResult;
use crate::job::record::JobRecord;
use crate::task::phase::TaskCheckpoint;

/// Trait for storing and retrieving job records and task checkpoints.
///
/// [`JobStore`] implementations define how the job tree survives a process
/// restart: one row per job, plus one sub-status row per (job, task) pair.
/// Status mutations always go through the store so the persisted tree never
/// trails the in-memory one by more than the write in flight.
///
/// Implementations should ensure thread-safety and handle concurrent access.
pub trait JobStore {
    /// Loads every persisted job row.
    ///
    /// Called once at orchestrator start to rebuild the in-memory tree; sub-jobs
    /// are included and linked through their parent id.
    fn load_jobs(&self) -> impl Future<Output = MigResult<Vec<JobRecord>>> + Send;

    /// Inserts or replaces one job row.
    fn upsert_job(&self, record: &JobRecord) -> impl Future<Output = MigResult<()>> + Send;

    /// Returns one job row by id.
    fn get_job(&self, id: &str) -> impl Future<Output = MigResult<Option<JobRecord>>> + Send;

    /// Returns the sub-job rows of the given parent, in insertion order.
    fn list_sub_jobs(
        &self,
        parent_id: &str,
    ) -> impl Future<Output = MigResult<Vec<JobRecord>>> + Send;

    /// Deletes one job row and its checkpoints.
    fn remove_job(&self, id: &str) -> impl Future<Output = MigResult<()>> + Send;

    /// Returns the persisted sub-status of one task, if any.
    fn get_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
    ) -> impl Future<Output = MigResult<Option<TaskCheckpoint>>> + Send;

    /// Persists the sub-status of one task, replacing the previous one.
    fn put_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
        checkpoint: &TaskCheckpoint,
    ) -> impl Future<Output = MigResult<()>> + Send;

    /// Drops every checkpoint of one job, typically when its plan is discarded.
    fn clear_task_checkpoints(&self, job_id: &str)
    -> impl Future<Output = MigResult<()>> + Send;
}
