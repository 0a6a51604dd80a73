use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::MigResult;
use crate::job::record::JobRecord;
use crate::store::base::JobStore;
use crate::task::phase::TaskCheckpoint;

/// Inner state of [`MemoryJobStore`].
#[derive(Debug, Default)]
struct Inner {
    /// Job rows keyed by id. A BTreeMap keeps listing deterministic.
    jobs: BTreeMap<String, JobRecord>,
    /// Insertion order of job ids, used to keep sub-job listings stable.
    insertion_order: Vec<String>,
    /// Latest sub-status per (job id, task key).
    checkpoints: HashMap<(String, String), TaskCheckpoint>,
}

/// In-memory implementation of [`JobStore`].
///
/// Keeps all rows in memory; ideal for tests and development. Everything is
/// lost on process exit, so crash-recovery behavior is exercised by sharing one
/// store instance across orchestrator lifetimes.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    async fn load_jobs(&self) -> MigResult<Vec<JobRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .insertion_order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    async fn upsert_job(&self, record: &JobRecord) -> MigResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.jobs.contains_key(&record.id) {
            inner.insertion_order.push(record.id.clone());
        }
        inner.jobs.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> MigResult<Option<JobRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(id).cloned())
    }

    async fn list_sub_jobs(&self, parent_id: &str) -> MigResult<Vec<JobRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .insertion_order
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|record| record.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn remove_job(&self, id: &str) -> MigResult<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.remove(id);
        inner.insertion_order.retain(|existing| existing != id);
        inner.checkpoints.retain(|(job_id, _), _| job_id != id);
        Ok(())
    }

    async fn get_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
    ) -> MigResult<Option<TaskCheckpoint>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .checkpoints
            .get(&(job_id.to_string(), task_key.to_string()))
            .cloned())
    }

    async fn put_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
        checkpoint: &TaskCheckpoint,
    ) -> MigResult<()> {
        let mut inner = self.inner.lock().await;
        inner.checkpoints.insert(
            (job_id.to_string(), task_key.to_string()),
            checkpoint.clone(),
        );
        Ok(())
    }

    async fn clear_task_checkpoints(&self, job_id: &str) -> MigResult<()> {
        let mut inner = self.inner.lock().await;
        inner.checkpoints.retain(|(id, _), _| id != job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::record::generate_job_id;
    use crate::job::spec::JobSpec;
    use crate::metadata::model::SystemKind;
    use crate::task::phase::{StepStatus, TaskCheckpoint, TaskPhase};

    fn record(parent: Option<String>) -> JobRecord {
        let spec = JobSpec::table(
            SystemKind::Hive,
            SystemKind::Warehouse,
            "src_db",
            "events",
            "dst_db",
            "events",
        );
        JobRecord::new(generate_job_id(parent.is_some()), parent, spec, 3, false)
    }

    #[tokio::test]
    async fn jobs_round_trip() {
        let store = MemoryJobStore::new();
        let root = record(None);
        let sub_a = record(Some(root.id.clone()));
        let sub_b = record(Some(root.id.clone()));

        store.upsert_job(&root).await.unwrap();
        store.upsert_job(&sub_a).await.unwrap();
        store.upsert_job(&sub_b).await.unwrap();

        assert_eq!(store.get_job(&root.id).await.unwrap(), Some(root.clone()));

        let subs = store.list_sub_jobs(&root.id).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].id, sub_a.id);
        assert_eq!(subs[1].id, sub_b.id);

        assert_eq!(store.load_jobs().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn checkpoints_replace_and_clear() {
        let store = MemoryJobStore::new();

        let doing = TaskCheckpoint::new(TaskPhase::DataTransfer, "load", StepStatus::Doing);
        store
            .put_task_checkpoint("job1", "job1.transfer", &doing)
            .await
            .unwrap();

        let done = TaskCheckpoint::new(TaskPhase::DataTransfer, "load", StepStatus::Done);
        store
            .put_task_checkpoint("job1", "job1.transfer", &done)
            .await
            .unwrap();

        let loaded = store
            .get_task_checkpoint("job1", "job1.transfer")
            .await
            .unwrap();
        assert_eq!(loaded, Some(done));

        store.clear_task_checkpoints("job1").await.unwrap();
        assert!(
            store
                .get_task_checkpoint("job1", "job1.transfer")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn remove_job_drops_checkpoints_too() {
        let store = MemoryJobStore::new();
        let root = record(None);
        store.upsert_job(&root).await.unwrap();

        let checkpoint = TaskCheckpoint::new(TaskPhase::SchemaSetup, "create_object", StepStatus::Done);
        store
            .put_task_checkpoint(&root.id, "setup", &checkpoint)
            .await
            .unwrap();

        store.remove_job(&root.id).await.unwrap();

        assert!(store.get_job(&root.id).await.unwrap().is_none());
        assert!(
            store
                .get_task_checkpoint(&root.id, "setup")
                .await
                .unwrap()
                .is_none()
        );
    }
}
