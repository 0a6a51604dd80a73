use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::error::MigResult;
use crate::job::record::JobRecord;
use crate::job::status::JobStatus;
use crate::store::base::JobStore;
use crate::store::memory::MemoryJobStore;
use crate::task::phase::TaskCheckpoint;
use crate::test_utils::notify::TimedNotify;

type StatusKey = (String, JobStatus);

/// [`JobStore`] wrapper that lets tests await job status transitions.
///
/// Delegates everything to an inner [`MemoryJobStore`]; every upsert checks the
/// registered notifications and wakes waiters for the (job id, status) pair.
/// The inner store can be shared across orchestrator lifetimes to exercise
/// crash recovery.
#[derive(Debug, Clone, Default)]
pub struct NotifyingJobStore {
    store: MemoryJobStore,
    notifications: Arc<Mutex<HashMap<StatusKey, Arc<Notify>>>>,
}

impl NotifyingJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing memory store, keeping its rows.
    pub fn from_store(store: MemoryJobStore) -> Self {
        Self {
            store,
            notifications: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The underlying memory store, e.g. to hand to a "restarted" orchestrator.
    pub fn inner_store(&self) -> MemoryJobStore {
        self.store.clone()
    }

    /// Returns a notifier that fires when the job reaches the given status.
    pub fn notify_on_job_status(&self, job_id: &str, status: JobStatus) -> TimedNotify {
        let mut notifications = self.lock_notifications();
        let notify = notifications
            .entry((job_id.to_string(), status))
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        TimedNotify::new(notify)
    }

    fn lock_notifications(&self) -> MutexGuard<'_, HashMap<StatusKey, Arc<Notify>>> {
        self.notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire(&self, record: &JobRecord) {
        let notifications = self.lock_notifications();
        if let Some(notify) = notifications.get(&(record.id.clone(), record.status)) {
            notify.notify_one();
        }
    }
}

impl JobStore for NotifyingJobStore {
    async fn load_jobs(&self) -> MigResult<Vec<JobRecord>> {
        self.store.load_jobs().await
    }

    async fn upsert_job(&self, record: &JobRecord) -> MigResult<()> {
        self.store.upsert_job(record).await?;
        self.fire(record);
        Ok(())
    }

    async fn get_job(&self, id: &str) -> MigResult<Option<JobRecord>> {
        self.store.get_job(id).await
    }

    async fn list_sub_jobs(&self, parent_id: &str) -> MigResult<Vec<JobRecord>> {
        self.store.list_sub_jobs(parent_id).await
    }

    async fn remove_job(&self, id: &str) -> MigResult<()> {
        self.store.remove_job(id).await
    }

    async fn get_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
    ) -> MigResult<Option<TaskCheckpoint>> {
        self.store.get_task_checkpoint(job_id, task_key).await
    }

    async fn put_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
        checkpoint: &TaskCheckpoint,
    ) -> MigResult<()> {
        self.store
            .put_task_checkpoint(job_id, task_key, checkpoint)
            .await
    }

    async fn clear_task_checkpoints(&self, job_id: &str) -> MigResult<()> {
        self.store.clear_task_checkpoints(job_id).await
    }
}
