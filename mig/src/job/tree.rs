use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mig_config::shared::OrchestratorConfig;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, MigResult};
use crate::job::record::{JobId, JobRecord, generate_job_id};
use crate::job::registry::FlowRegistry;
use crate::job::spec::JobSpec;
use crate::job::status::{JobStatus, aggregate};
use crate::job::table::build_table_dag;
use crate::metadata::model::{ObjectType, partition_identifier};
use crate::metadata::source::MetaSource;
use crate::metadata::transform::{RenameTransform, SchemaTransform};
use crate::store::JobStore;
use crate::task::base::{Task, TaskKind, TaskStatusView};
use crate::task::dag::TaskDag;
use crate::task::progress::TaskProgress;
use crate::{bail, mig_error};

/// Per-job mutable state, serialized by one lock per job instance.
#[derive(Debug)]
struct JobState {
    record: JobRecord,
    /// The job's task DAG; `None` until planned, discarded on reset/retry.
    dag: Option<Arc<TaskDag>>,
}

/// One job held in memory, with its own mutation lock.
#[derive(Debug)]
struct JobEntry {
    state: Mutex<JobState>,
}

impl JobEntry {
    fn new(record: JobRecord) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(JobState { record, dag: None }),
        })
    }
}

/// Tree-level bookkeeping: the entry map and the parent/child index.
#[derive(Debug, Default)]
struct TreeInner {
    entries: HashMap<JobId, Arc<JobEntry>>,
    children: HashMap<JobId, Vec<JobId>>,
    roots: Vec<JobId>,
}

/// The persistent hierarchy of jobs with status aggregation, reset, retry, and
/// cascading stop.
///
/// The tree exclusively owns job records; a job exclusively owns its in-memory
/// task DAG, rebuilt from persisted records after a restart. Job-level mutation
/// is serialized per job instance, never globally.
pub struct JobTree<S, M> {
    store: S,
    meta: M,
    registry: Arc<FlowRegistry>,
    transform: Arc<dyn SchemaTransform + Send + Sync>,
    config: Arc<OrchestratorConfig>,
    inner: Arc<Mutex<TreeInner>>,
}

impl<S, M> Clone for JobTree<S, M>
where
    S: Clone,
    M: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            meta: self.meta.clone(),
            registry: self.registry.clone(),
            transform: self.transform.clone(),
            config: self.config.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S, M> JobTree<S, M>
where
    S: JobStore + Clone + Send + Sync + 'static,
    M: MetaSource + Clone + Send + Sync + 'static,
{
    pub fn new(store: S, meta: M, registry: Arc<FlowRegistry>, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            store,
            meta,
            registry,
            transform: Arc::new(RenameTransform),
            config,
            inner: Arc::new(Mutex::new(TreeInner::default())),
        }
    }

    /// Replaces the schema transform used when planning destination objects.
    pub fn with_transform(mut self, transform: Arc<dyn SchemaTransform + Send + Sync>) -> Self {
        self.transform = transform;
        self
    }

    /// Loads every persisted job row into the in-memory tree.
    ///
    /// Called once at startup, before the scheduler runs.
    pub async fn load(&self) -> MigResult<usize> {
        let records = self.store.load_jobs().await?;
        let count = records.len();

        let mut inner = self.inner.lock().await;
        // Rebuild from scratch so jobs submitted before start are not indexed
        // twice.
        inner.entries.clear();
        inner.children.clear();
        inner.roots.clear();
        for record in records {
            if let Some(parent_id) = record.parent_id.clone() {
                inner
                    .children
                    .entry(parent_id)
                    .or_default()
                    .push(record.id.clone());
            } else {
                inner.roots.push(record.id.clone());
            }
            inner
                .entries
                .insert(record.id.clone(), JobEntry::new(record));
        }

        info!(jobs = count, "job tree loaded from store");
        Ok(count)
    }

    /// Resets every job persisted as `Running` back to `Pending`.
    ///
    /// A running status found at process start means the previous process died
    /// mid-flight: the work is interrupted, not failed, and resumes from the
    /// last completed idempotent sub-step because task checkpoints are kept.
    pub async fn recover_interrupted(&self) -> MigResult<usize> {
        let entries = self.all_entries().await;

        let mut recovered = 0;
        for (id, entry) in entries {
            let mut state = entry.state.lock().await;
            if state.record.status == JobStatus::Running {
                info!(job_id = %id, "recovering job interrupted by restart");
                state.record.set_status(JobStatus::Pending);
                self.store.upsert_job(&state.record).await?;
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(jobs = recovered, "interrupted jobs reset to pending");
        }
        Ok(recovered)
    }

    /// Submits a migration request, creating the root job and its sub-jobs.
    ///
    /// Unsupported source/destination/object-type combinations are rejected
    /// immediately.
    pub async fn submit(&self, spec: JobSpec) -> MigResult<JobId> {
        if !self
            .registry
            .supports(spec.source_system, spec.dest_system, spec.object_type)
        {
            bail!(
                ErrorKind::UnsupportedFlow,
                "Unsupported migration flow",
                format!(
                    "{} -> {} for object type {}",
                    spec.source_system, spec.dest_system, spec.object_type
                )
            );
        }

        match spec.object_type {
            ObjectType::Table => self.submit_table_job(None, spec).await,
            ObjectType::Catalog => self.submit_catalog_job(spec).await,
            ObjectType::Partition => bail!(
                ErrorKind::ValidationError,
                "Partition jobs are created internally by their table job"
            ),
        }
    }

    async fn submit_catalog_job(&self, spec: JobSpec) -> MigResult<JobId> {
        if !self.meta.has_database(&spec.source_catalog).await? {
            bail!(
                ErrorKind::MissingObject,
                "Source catalog does not exist",
                spec.source_catalog.clone()
            );
        }

        let tables = self.meta.list_tables(&spec.source_catalog).await?;
        if tables.is_empty() {
            bail!(
                ErrorKind::ValidationError,
                "Source catalog has no tables to migrate",
                spec.source_catalog.clone()
            );
        }

        let root_id = spec
            .id
            .clone()
            .unwrap_or_else(|| generate_job_id(false));
        let max_attempts = self.max_attempts(&spec);
        let record = JobRecord::new(root_id.clone(), None, spec.clone(), max_attempts, true);
        self.store.upsert_job(&record).await?;
        self.insert_entry(record).await;

        for table in &tables {
            let sub_id = generate_job_id(true);
            let sub_spec = spec.for_table(sub_id, table);
            self.submit_table_job(Some(root_id.clone()), sub_spec).await?;
        }

        info!(job_id = %root_id, tables = tables.len(), "catalog job submitted");
        Ok(root_id)
    }

    async fn submit_table_job(&self, parent_id: Option<JobId>, spec: JobSpec) -> MigResult<JobId> {
        if !self
            .meta
            .has_table(&spec.source_catalog, &spec.source_object)
            .await?
        {
            bail!(
                ErrorKind::MissingObject,
                "Source table does not exist",
                format!("{}.{}", spec.source_catalog, spec.source_object)
            );
        }

        let table = self
            .meta
            .get_table_meta(&spec.source_catalog, &spec.source_object, true)
            .await?;

        let mut spec = spec;
        spec.source_last_modified = table.last_modified;

        let job_id = spec
            .id
            .clone()
            .unwrap_or_else(|| generate_job_id(parent_id.is_some()));
        let max_attempts = self.max_attempts(&spec);

        // One sub-job per filtered pending partition.
        let mut sub_specs = Vec::new();
        if table.is_partitioned() {
            for partition in &table.partitions {
                if let Some(filter) = &spec.partition_filter {
                    if !filter.matches(&partition.values) {
                        continue;
                    }
                }
                let identifier = partition_identifier(&table.name, &partition.values);
                let sub_id = generate_job_id(true);
                sub_specs.push(spec.for_partition(sub_id, &identifier, partition.last_modified));
            }
        }

        let record = JobRecord::new(
            job_id.clone(),
            parent_id,
            spec,
            max_attempts,
            !sub_specs.is_empty(),
        );
        self.store.upsert_job(&record).await?;
        self.insert_entry(record).await;

        let sub_count = sub_specs.len();
        for sub_spec in sub_specs {
            let sub_id = sub_spec.id.clone().unwrap_or_else(|| generate_job_id(true));
            let sub_record =
                JobRecord::new(sub_id, Some(job_id.clone()), sub_spec, max_attempts, false);
            self.store.upsert_job(&sub_record).await?;
            self.insert_entry(sub_record).await;
        }

        debug!(job_id = %job_id, partitions = sub_count, "table job submitted");
        Ok(job_id)
    }

    fn max_attempts(&self, spec: &JobSpec) -> u32 {
        spec.max_attempts.unwrap_or(self.config.default_max_attempts)
    }

    /// Ids of every root job currently in the tree.
    pub async fn root_jobs(&self) -> Vec<JobId> {
        self.inner.lock().await.roots.clone()
    }

    /// Clone of one job record.
    pub async fn job_record(&self, id: &str) -> MigResult<JobRecord> {
        let entry = self.entry(id).await?;
        let state = entry.state.lock().await;
        Ok(state.record.clone())
    }

    /// Free-text info / failure reason of one job.
    pub async fn job_info(&self, id: &str) -> MigResult<String> {
        Ok(self.job_record(id).await?.info)
    }

    /// Snapshots of the job's current tasks, for status surfaces.
    ///
    /// Empty when the job has no planned DAG (not started, or reset).
    pub async fn job_tasks(&self, id: &str) -> MigResult<Vec<TaskStatusView>> {
        let entry = self.entry(id).await?;
        let dag = {
            let state = entry.state.lock().await;
            state.dag.clone()
        };

        let Some(dag) = dag else {
            return Ok(Vec::new());
        };

        let mut views = Vec::with_capacity(dag.len());
        for task in dag.tasks() {
            views.push(task.status_view().await);
        }
        Ok(views)
    }

    /// Aggregation-corrected status of one job.
    ///
    /// A job with sub-jobs derives its status from them; when the persisted
    /// status trails the aggregation (possible after a crash), the record is
    /// corrected on read. `Failed` and `Canceled` stick until retry/reset.
    pub async fn job_status(&self, id: &str) -> MigResult<JobStatus> {
        let entry = self.entry(id).await?;
        let children = self.children_entries(id).await;

        let mut state = entry.state.lock().await;
        if !state.record.has_sub_jobs || children.is_empty() {
            return Ok(state.record.status);
        }
        if matches!(state.record.status, JobStatus::Failed | JobStatus::Canceled) {
            return Ok(state.record.status);
        }

        let mut statuses = Vec::with_capacity(children.len());
        for (_, child) in &children {
            let child_state = child.state.lock().await;
            statuses.push(child_state.record.status);
        }

        let aggregated = aggregate(&statuses);
        // A table job's record is authoritative while its DAG is in flight,
        // since partition sub-jobs only move at transfer completion; catalogs
        // always follow their table sub-jobs.
        let corrected = match state.record.object_type {
            ObjectType::Catalog => aggregated,
            _ if aggregated.is_terminal() => aggregated,
            _ => state.record.status,
        };

        if corrected != state.record.status {
            info!(
                job_id = %id,
                current = %state.record.status,
                aggregated = %corrected,
                "correcting job status from sub-jobs"
            );
            state.record.set_status(corrected);
            self.store.upsert_job(&state.record).await?;
        }

        Ok(corrected)
    }

    /// Computes the currently executable tasks of one root job.
    ///
    /// Side-effect-light: plans the table DAG on first need, otherwise only
    /// reads the DAG frontier. Catalog jobs gather tasks from their table
    /// sub-jobs up to the configured batch cap so one huge catalog cannot
    /// starve the scheduling loop.
    pub async fn executable_tasks(&self, root_id: &str) -> MigResult<Vec<Arc<Task>>> {
        let record = self.job_record(root_id).await?;

        match record.object_type {
            ObjectType::Catalog => {
                let mut tasks = Vec::new();
                let children = self.children_entries(root_id).await;
                for (child_id, _) in children {
                    tasks.extend(self.table_executable_tasks(&child_id).await?);
                    if tasks.len() >= self.config.executable_task_batch {
                        break;
                    }
                }
                Ok(tasks)
            }
            ObjectType::Table => self.table_executable_tasks(root_id).await,
            ObjectType::Partition => Ok(Vec::new()),
        }
    }

    async fn table_executable_tasks(&self, job_id: &str) -> MigResult<Vec<Arc<Task>>> {
        let entry = self.entry(job_id).await?;
        let pending_sub_jobs = self.pending_sub_jobs(job_id).await;

        let mut state = entry.state.lock().await;
        match state.record.status {
            JobStatus::Succeeded | JobStatus::Canceled => return Ok(Vec::new()),
            // Failed jobs only get their best-effort cleanup scheduled.
            JobStatus::Failed => {
                let Some(dag) = &state.dag else {
                    return Ok(Vec::new());
                };
                let cleanup: Vec<Arc<Task>> = dag
                    .executable_tasks()
                    .await
                    .into_iter()
                    .filter(|task| task.kind() == TaskKind::Cleanup)
                    .collect();
                return Ok(cleanup);
            }
            JobStatus::Pending | JobStatus::Running => {}
        }

        if state.dag.is_none() {
            debug!(job_id, "task DAG not generated yet, planning");
            match self.plan_table(&state.record, &pending_sub_jobs).await {
                Ok(dag) => state.dag = Some(Arc::new(dag)),
                Err(err) => {
                    warn!(job_id, error = %err, "planning failed, failing job");
                    // Planning never reaches Running, so charge the attempt
                    // here or a broken plan would retry forever.
                    state.record.attempts += 1;
                    state.record.fail(format!("planning failed: {err}"));
                    self.store.upsert_job(&state.record).await?;
                    return Ok(Vec::new());
                }
            }
        }

        let Some(dag) = &state.dag else {
            return Ok(Vec::new());
        };
        Ok(dag.executable_tasks().await)
    }

    /// Plans the task DAG of one table job.
    async fn plan_table(
        &self,
        record: &JobRecord,
        pending_sub_jobs: &[JobRecord],
    ) -> MigResult<TaskDag> {
        let spec = &record.spec;
        let Some(flow) = self
            .registry
            .get(spec.source_system, spec.dest_system, spec.object_type)
        else {
            bail!(
                ErrorKind::UnsupportedFlow,
                "No registered flow for table job",
                record.id.clone()
            );
        };

        let source = self
            .meta
            .get_table_meta(&spec.source_catalog, &spec.source_object, true)
            .await?;
        let dest = self
            .transform
            .transform(&source, &spec.dest_catalog, &spec.dest_object)?;
        let limits = spec.grouping.unwrap_or(self.config.grouping);

        build_table_dag(
            record,
            flow,
            &self.meta,
            &source,
            &dest,
            pending_sub_jobs,
            &limits,
        )
        .await
    }

    /// Marks a table job running when its first task is dispatched.
    pub async fn on_task_started(&self, job_id: &str) -> MigResult<()> {
        let entry = self.entry(job_id).await?;
        let mut state = entry.state.lock().await;
        if state.record.status == JobStatus::Pending {
            state.record.set_status(JobStatus::Running);
            self.store.upsert_job(&state.record).await?;
        }
        Ok(())
    }

    /// Propagates one task's terminal state into the job tree.
    ///
    /// Data-transfer outcomes set the backing sub-jobs' statuses; once every
    /// transfer vertex is terminal and at least one failed, the job fails with
    /// a reason naming the failed vertex ids, while a cleanup vertex still runs
    /// afterwards.
    pub async fn on_task_terminal(&self, task: &Arc<Task>) -> MigResult<()> {
        let entry = self.entry(task.job_id()).await?;
        let children = self.children_entries(task.job_id()).await;

        let mut state = entry.state.lock().await;
        let Some(dag) = state.dag.clone() else {
            debug!(task_id = %task.id(), "task outcome for a discarded plan ignored");
            return Ok(());
        };
        if dag.find(task.id()).is_none() {
            debug!(task_id = %task.id(), "outdated task outcome ignored");
            return Ok(());
        }

        let progress = task.progress().await;
        match task.kind() {
            TaskKind::DataTransfer => {
                let sub_status = match progress {
                    TaskProgress::Succeeded => JobStatus::Succeeded,
                    TaskProgress::Canceled => JobStatus::Canceled,
                    _ => JobStatus::Failed,
                };
                for (child_id, child) in &children {
                    if !task.sub_job_ids().contains(child_id) {
                        continue;
                    }
                    let mut child_state = child.state.lock().await;
                    if !child_state.record.is_terminal() {
                        child_state.record.set_status(sub_status);
                        self.store.upsert_job(&child_state.record).await?;
                    }
                }

                if dag.transfers_terminal().await {
                    let failed = dag.failed_transfer_ids().await;
                    if !failed.is_empty() {
                        // The DAG is kept so a cleanup vertex still runs.
                        state
                            .record
                            .fail(format!("data transfer failed, task id(s): {}", failed.join(",")));
                        self.store.upsert_job(&state.record).await?;
                    } else if dag.all_succeeded().await {
                        self.complete_table_job(&mut state).await?;
                    }
                }
            }
            TaskKind::Setup => {
                if progress == TaskProgress::Failed {
                    let reason = task
                        .failure()
                        .await
                        .unwrap_or_else(|| "setup failed".to_string());
                    // Nothing ran yet, so cancel the rest of the plan outright.
                    dag.stop_all().await;
                    state
                        .record
                        .fail(format!("setup task {} failed: {reason}", task.id()));
                    self.store.upsert_job(&state.record).await?;
                }
            }
            TaskKind::Cleanup => match progress {
                TaskProgress::Succeeded => {
                    // Completion needs the whole plan green; transfer failures
                    // already failed the job and only borrowed the cleanup.
                    if state.record.status != JobStatus::Failed && dag.all_succeeded().await {
                        self.complete_table_job(&mut state).await?;
                    }
                }
                TaskProgress::Failed => {
                    if state.record.status != JobStatus::Failed {
                        let reason = task
                            .failure()
                            .await
                            .unwrap_or_else(|| "cleanup failed".to_string());
                        state
                            .record
                            .fail(format!("cleanup task {} failed: {reason}", task.id()));
                        self.store.upsert_job(&state.record).await?;
                    }
                }
                _ => {}
            },
        }

        Ok(())
    }

    async fn complete_table_job(&self, state: &mut JobState) -> MigResult<()> {
        state.record.set_status(JobStatus::Succeeded);
        self.store.upsert_job(&state.record).await?;
        // Completed plans never resume, so their checkpoints can go.
        self.store.clear_task_checkpoints(&state.record.id).await?;
        info!(job_id = %state.record.id, "table job succeeded");
        Ok(())
    }

    /// Retries a failed or canceled job while attempts remain.
    ///
    /// Flips the job (and its failed/canceled sub-jobs) back to `Pending` and
    /// discards the DAG for rebuilding; kept checkpoints let resumed tasks skip
    /// their completed steps.
    pub async fn retry(&self, id: &str) -> MigResult<bool> {
        let entry = self.entry(id).await?;
        let mut state = entry.state.lock().await;

        if state.record.attempts >= state.record.max_attempts {
            info!(
                job_id = %id,
                attempts = state.record.attempts,
                max_attempts = state.record.max_attempts,
                "reached max attempt count, not retrying"
            );
            return Ok(false);
        }

        info!(
            job_id = %id,
            attempts = state.record.attempts,
            max_attempts = state.record.max_attempts,
            "retrying job"
        );

        for (descendant_id, descendant) in self.descendant_entries(id).await {
            let mut descendant_state = descendant.state.lock().await;
            if matches!(
                descendant_state.record.status,
                JobStatus::Failed | JobStatus::Canceled
            ) {
                if descendant_state.record.attempts >= descendant_state.record.max_attempts {
                    info!(
                        job_id = %id,
                        sub_job_id = %descendant_id,
                        "sub-job exhausted its attempts, leaving it terminal"
                    );
                    continue;
                }
                descendant_state.record.revive();
                descendant_state.dag = None;
                self.store.upsert_job(&descendant_state.record).await?;
            }
        }

        state.record.revive();
        state.dag = None;
        self.store.upsert_job(&state.record).await?;

        Ok(true)
    }

    /// Retries a job the scheduler observed as failed, if attempts remain.
    pub async fn maybe_retry(&self, id: &str) -> MigResult<bool> {
        let record = self.job_record(id).await?;
        if record.status != JobStatus::Failed {
            return Ok(false);
        }
        self.retry(id).await
    }

    /// Resets a terminal job back to `Pending`, re-checking the source object.
    ///
    /// Detected drift (advanced last-modified time, added or removed
    /// partitions) forces the reset and discards the stale plan together with
    /// its checkpoints; `force` resets regardless.
    pub async fn reset(&self, id: &str, force: bool) -> MigResult<bool> {
        self.reset_inner(id.to_string(), force).await
    }

    fn reset_inner(
        &self,
        id: JobId,
        force: bool,
    ) -> Pin<Box<dyn Future<Output = MigResult<bool>> + Send + '_>> {
        Box::pin(async move {
            let entry = self.entry(&id).await?;

            {
                let state = entry.state.lock().await;
                if !state.record.is_terminal() {
                    bail!(
                        ErrorKind::InvalidState,
                        "Unable to reset a pending or running job",
                        id.clone()
                    );
                }
            }

            let mut need_reset = false;

            // Refresh the sub-job set before recursing so new partitions get
            // reset along with everything else.
            let record = self.job_record(&id).await?;
            if record.object_type == ObjectType::Table && record.has_sub_jobs {
                self.remove_invalid_sub_jobs(&record).await?;
                need_reset |= self.add_new_sub_jobs(&record).await?;
            }

            for (child_id, child) in self.children_entries(&id).await {
                let child_terminal = {
                    let child_state = child.state.lock().await;
                    child_state.record.is_terminal()
                };
                if child_terminal {
                    need_reset |= self.reset_inner(child_id, force).await?;
                } else {
                    warn!(job_id = %id, sub_job_id = %child_id, "skipping reset of non-terminal sub-job");
                }
            }

            let object_changed = self.update_object_metadata(&id).await?;
            if object_changed {
                info!(job_id = %id, "source object has changed");
            }

            let mut state = entry.state.lock().await;
            let status = state.record.status;
            if force
                || need_reset
                || object_changed
                || matches!(status, JobStatus::Failed | JobStatus::Canceled)
            {
                state.record.revive();
                state.record.attempts = 0;
                state.dag = None;
                self.store.upsert_job(&state.record).await?;
                // The plan is invalid; resuming its checkpoints would skip
                // steps of a different plan.
                self.store.clear_task_checkpoints(&state.record.id).await?;
                info!(job_id = %id, prev_status = %status, "job has been reset");
                Ok(true)
            } else {
                debug!(job_id = %id, "no need to reset");
                Ok(false)
            }
        })
    }

    /// Re-reads the source object's metadata, recording and reporting drift.
    async fn update_object_metadata(&self, id: &str) -> MigResult<bool> {
        let entry = self.entry(id).await?;
        let mut state = entry.state.lock().await;
        let spec = &state.record.spec;

        let new_last_modified = match spec.object_type {
            ObjectType::Table => {
                self.meta
                    .get_table_meta(&spec.source_catalog, &spec.source_object, false)
                    .await?
                    .last_modified
            }
            ObjectType::Partition => {
                let values =
                    crate::metadata::model::partition_values_from_identifier(&spec.source_object);
                // The partition identifier embeds the table name.
                let table = spec
                    .source_object
                    .split('/')
                    .next()
                    .unwrap_or(&spec.source_object)
                    .to_string();
                self.meta
                    .get_partition_meta(&spec.source_catalog, &table, &values)
                    .await?
                    .last_modified
            }
            ObjectType::Catalog => None,
        };

        let changed = match (spec.source_last_modified, new_last_modified) {
            (Some(old), Some(new)) => old < new,
            _ => false,
        };

        if changed {
            state.record.spec.source_last_modified = new_last_modified;
            self.store.upsert_job(&state.record).await?;
        }

        Ok(changed)
    }

    /// Removes sub-jobs whose source partition no longer exists.
    async fn remove_invalid_sub_jobs(&self, record: &JobRecord) -> MigResult<()> {
        let spec = &record.spec;
        let table = self
            .meta
            .get_table_meta(&spec.source_catalog, &spec.source_object, true)
            .await?;
        if !table.is_partitioned() {
            return Ok(());
        }

        let live: std::collections::HashSet<String> = table
            .partitions
            .iter()
            .map(|partition| partition_identifier(&table.name, &partition.values))
            .collect();

        for (child_id, child) in self.children_entries(&record.id).await {
            let identifier = {
                let child_state = child.state.lock().await;
                child_state.record.spec.source_object.clone()
            };
            if !live.contains(&identifier) {
                info!(
                    job_id = %record.id,
                    sub_job_id = %child_id,
                    partition = %identifier,
                    "removing sub-job for a vanished partition"
                );
                self.remove_entry(&child_id).await;
                self.store.remove_job(&child_id).await?;
            }
        }

        Ok(())
    }

    /// Adds sub-jobs for partitions that appeared since the job was created.
    async fn add_new_sub_jobs(&self, record: &JobRecord) -> MigResult<bool> {
        let spec = &record.spec;
        let table = self
            .meta
            .get_table_meta(&spec.source_catalog, &spec.source_object, true)
            .await?;
        if !table.is_partitioned() {
            return Ok(false);
        }

        let known: std::collections::HashSet<String> = {
            let mut known = std::collections::HashSet::new();
            for (_, child) in self.children_entries(&record.id).await {
                let child_state = child.state.lock().await;
                known.insert(child_state.record.spec.source_object.clone());
            }
            known
        };

        let mut added = false;
        for partition in &table.partitions {
            if let Some(filter) = &spec.partition_filter {
                if !filter.matches(&partition.values) {
                    continue;
                }
            }
            let identifier = partition_identifier(&table.name, &partition.values);
            if known.contains(&identifier) {
                continue;
            }

            let sub_id = generate_job_id(true);
            let sub_spec = spec.for_partition(sub_id.clone(), &identifier, partition.last_modified);
            let sub_record = JobRecord::new(
                sub_id.clone(),
                Some(record.id.clone()),
                sub_spec,
                record.max_attempts,
                false,
            );
            self.store.upsert_job(&sub_record).await?;
            self.insert_entry(sub_record).await;
            info!(
                job_id = %record.id,
                sub_job_id = %sub_id,
                partition = %identifier,
                "new sub-job for a discovered partition"
            );
            added = true;
        }

        Ok(added)
    }

    /// Cancels a job and everything beneath it.
    ///
    /// The cascade visits sub-jobs and the DAG even when the job itself already
    /// looks terminal, since in-memory and persisted status can diverge after a
    /// crash.
    pub async fn stop(&self, id: &str) -> MigResult<()> {
        self.stop_inner(id.to_string()).await
    }

    fn stop_inner(&self, id: JobId) -> Pin<Box<dyn Future<Output = MigResult<()>> + Send + '_>> {
        Box::pin(async move {
            let entry = self.entry(&id).await?;

            {
                let mut state = entry.state.lock().await;
                if state.record.is_terminal() {
                    info!(job_id = %id, "stop on terminated job, still cascading");
                } else {
                    info!(job_id = %id, status = %state.record.status, "stopping job");
                    state.record.set_status(JobStatus::Canceled);
                    self.store.upsert_job(&state.record).await?;
                }

                if let Some(dag) = &state.dag {
                    dag.stop_all().await;
                }
            }

            let cascades: Vec<_> = self
                .children_entries(&id)
                .await
                .into_iter()
                .map(|(child_id, _)| self.stop_inner(child_id))
                .collect();
            let failures: Vec<_> = futures::future::join_all(cascades)
                .await
                .into_iter()
                .filter_map(Result::err)
                .collect();
            if !failures.is_empty() {
                return Err(failures.into());
            }

            Ok(())
        })
    }

    /// Pending sub-job records of one table job, in insertion order.
    async fn pending_sub_jobs(&self, job_id: &str) -> Vec<JobRecord> {
        let mut pending = Vec::new();
        for (_, child) in self.children_entries(job_id).await {
            let child_state = child.state.lock().await;
            if child_state.record.status == JobStatus::Pending {
                pending.push(child_state.record.clone());
            }
        }
        pending
    }

    async fn entry(&self, id: &str) -> MigResult<Arc<JobEntry>> {
        let inner = self.inner.lock().await;
        inner.entries.get(id).cloned().ok_or_else(|| {
            mig_error!(ErrorKind::MissingObject, "Unknown job id", id.to_string())
        })
    }

    async fn children_entries(&self, id: &str) -> Vec<(JobId, Arc<JobEntry>)> {
        let inner = self.inner.lock().await;
        inner
            .children
            .get(id)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child_id| {
                        inner
                            .entries
                            .get(child_id)
                            .map(|entry| (child_id.clone(), entry.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Depth-first list of every descendant entry of one job.
    async fn descendant_entries(&self, id: &str) -> Vec<(JobId, Arc<JobEntry>)> {
        let mut result = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            for (child_id, entry) in self.children_entries(&current).await {
                stack.push(child_id.clone());
                result.push((child_id, entry));
            }
        }
        result
    }

    async fn all_entries(&self) -> Vec<(JobId, Arc<JobEntry>)> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    async fn insert_entry(&self, record: JobRecord) {
        let mut inner = self.inner.lock().await;
        if let Some(parent_id) = record.parent_id.clone() {
            inner
                .children
                .entry(parent_id)
                .or_default()
                .push(record.id.clone());
        } else {
            inner.roots.push(record.id.clone());
        }
        inner
            .entries
            .insert(record.id.clone(), JobEntry::new(record));
    }

    async fn remove_entry(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.entries.remove(id);
        for children in inner.children.values_mut() {
            children.retain(|child| child != id);
        }
        inner.children.remove(id);
        inner.roots.retain(|root| root != id);
    }
}
