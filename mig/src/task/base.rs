use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionProgress, ActionReport, take_failure};
use crate::backend::Backend;
use crate::error::{ErrorKind, MigResult};
use crate::job::JobId;
use crate::metadata::model::TableMeta;
use crate::mig_error;
use crate::resource::{ObjectLocks, ResourceDemand, ResourceGate, ResourceKind};
use crate::store::JobStore;
use crate::task::phase::{StepStatus, TaskCheckpoint, TaskPhase};
use crate::task::progress::TaskProgress;

/// Identifier of a task.
///
/// Task ids are deterministic per job and plan so that a rebuilt DAG finds the
/// persisted checkpoints of its predecessor.
pub type TaskId = String;

/// Upper bound on how long an admission-refused action waits before re-polling
/// the gate.
const ADMISSION_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// Coarse classification of a task inside its DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Setup,
    DataTransfer,
    Cleanup,
}

impl TaskKind {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            TaskKind::Setup => "setup",
            TaskKind::DataTransfer => "data_transfer",
            TaskKind::Cleanup => "cleanup",
        }
    }
}

/// The work a task performs, with its metadata snapshots.
///
/// Tasks are a closed family: the planner constructs one of these shapes per
/// DAG vertex, and the step plan is derived from the shape instead of from a
/// class hierarchy.
#[derive(Debug)]
pub enum TaskWork {
    /// Creates the destination object and pre-declares the partitions of every
    /// transfer group.
    Setup {
        dest: Arc<TableMeta>,
        /// Destination snapshots restricted to each group's partitions.
        group_partitions: Vec<Arc<TableMeta>>,
    },
    /// Moves one partition group (or the whole table) to the destination.
    DataTransfer {
        source: Arc<TableMeta>,
        dest: Arc<TableMeta>,
        /// Present for flows that load through a staging object.
        staging: Option<Arc<TableMeta>>,
        /// Whether a verification phase follows the transfer.
        verify: bool,
    },
    /// Drops the staging objects left behind by the transfer vertices.
    Cleanup { staging: Vec<Arc<TableMeta>> },
}

/// One step of a task's phase plan.
#[derive(Debug, Clone, Copy)]
struct StepDef {
    phase: TaskPhase,
    name: &'static str,
    resource: ResourceKind,
}

/// Mutable state of a task, guarded by one lock per task instance.
#[derive(Debug)]
struct TaskState {
    progress: TaskProgress,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    current_phase: Option<TaskPhase>,
    current_step: Option<&'static str>,
    failure: Option<String>,
    abort: Option<AbortHandle>,
}

/// Shared collaborators a task needs to execute its steps.
#[derive(Debug, Clone)]
pub struct TaskContext<S, B> {
    pub store: S,
    pub backend: B,
    pub gate: ResourceGate,
    pub locks: ObjectLocks,
}

/// Observability snapshot of one task.
#[derive(Debug, Clone)]
pub struct TaskStatusView {
    pub id: TaskId,
    pub kind: TaskKind,
    pub progress: TaskProgress,
    pub phase: Option<TaskPhase>,
    pub step: Option<&'static str>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

/// A named unit of migration work belonging to exactly one job.
///
/// Created by the DAG builder, mutated only by its own execution loop and by
/// stop requests. Terminal once all phases complete or one step fails.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    job_id: JobId,
    /// Sub-jobs this task covers; empty for whole-table transfers and for
    /// setup/cleanup vertices.
    sub_job_ids: Vec<JobId>,
    work: TaskWork,
    state: Mutex<TaskState>,
    cancel: Notify,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        job_id: impl Into<JobId>,
        sub_job_ids: Vec<JobId>,
        work: TaskWork,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            sub_job_ids,
            work,
            state: Mutex::new(TaskState {
                progress: TaskProgress::Pending,
                started_at: None,
                ended_at: None,
                current_phase: None,
                current_step: None,
                failure: None,
                abort: None,
            }),
            cancel: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn sub_job_ids(&self) -> &[JobId] {
        &self.sub_job_ids
    }

    pub fn kind(&self) -> TaskKind {
        match self.work {
            TaskWork::Setup { .. } => TaskKind::Setup,
            TaskWork::DataTransfer { .. } => TaskKind::DataTransfer,
            TaskWork::Cleanup { .. } => TaskKind::Cleanup,
        }
    }

    pub async fn progress(&self) -> TaskProgress {
        self.state.lock().await.progress
    }

    /// Reason recorded when the task failed.
    pub async fn failure(&self) -> Option<String> {
        self.state.lock().await.failure.clone()
    }

    /// Snapshot of the task for status surfaces.
    pub async fn status_view(&self) -> TaskStatusView {
        let state = self.state.lock().await;
        TaskStatusView {
            id: self.id.clone(),
            kind: self.kind(),
            progress: state.progress,
            phase: state.current_phase,
            step: state.current_step,
            started_at: state.started_at,
            ended_at: state.ended_at,
            failure: state.failure.clone(),
        }
    }

    /// Cancels the task, interrupting its in-flight action if any.
    ///
    /// Idempotent; a terminal task is left untouched.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.progress.is_terminal() {
            debug!(task_id = %self.id, "stop on terminated task ignored");
            return;
        }

        info!(task_id = %self.id, progress = %state.progress, "stopping task");
        state.progress = TaskProgress::Canceled;
        if state.ended_at.is_none() {
            state.ended_at = Some(Utc::now());
        }
        if let Some(abort) = state.abort.take() {
            abort.abort();
        }
        drop(state);

        self.cancel.notify_waiters();
    }

    /// Drives the task through its remaining steps to a terminal state.
    ///
    /// Resumes past steps whose persisted sub-status is `done`; a step left at
    /// `doing` or `failed` re-runs from its start. Returns `Err` only for a step
    /// failure; cancellation is an `Ok` exit with progress `Canceled`.
    pub async fn run<S, B>(&self, ctx: &TaskContext<S, B>) -> MigResult<()>
    where
        S: JobStore + Sync,
        B: Backend + Clone + Send + Sync + 'static,
    {
        if !self.mark_running().await {
            return Ok(());
        }

        let steps = self.step_plan();
        let start_index = self.resume_index(ctx, &steps).await?;
        if start_index > 0 {
            info!(
                task_id = %self.id,
                skipped_steps = start_index,
                "resuming task past completed steps"
            );
        }

        for step in steps.iter().skip(start_index) {
            if self.is_canceled().await {
                return Ok(());
            }

            self.enter_step(step).await;
            self.checkpoint(ctx, step, StepStatus::Doing).await?;

            let demand = ResourceDemand::from([(step.resource, 1)]);
            let mut action = Action::new(
                format!("{}.{}", self.id, step.name),
                self.id.clone(),
                demand,
            );

            // Admission: park on a gate release (or cancellation) instead of
            // holding a worker busy. The interval arm covers a release that
            // lands between the failed reservation and the wait registration.
            loop {
                if self.is_canceled().await {
                    return Ok(());
                }
                if action.try_reserve(&ctx.gate).await {
                    break;
                }
                tokio::select! {
                    _ = ctx.gate.released() => {}
                    _ = self.cancel.notified() => {}
                    _ = tokio::time::sleep(ADMISSION_RETRY_INTERVAL) => {}
                }
            }

            let call = self.step_call(step.name, ctx.backend.clone(), ctx.locks.clone());
            action.execute(call);

            // A stop that raced the spawn has no abort handle to use; check
            // once the handle is registered.
            self.register_abort(&action).await;
            if self.is_canceled().await {
                action.stop();
            }

            let progress = action.wait().await;
            self.clear_abort().await;
            action.release(&ctx.gate).await;

            match progress {
                ActionProgress::Succeeded => {
                    self.checkpoint(ctx, step, StepStatus::Done).await?;
                }
                ActionProgress::Canceled => {
                    // The `doing` sub-status stays behind so a retry re-runs
                    // this step.
                    self.mark_canceled().await;
                    return Ok(());
                }
                _ => {
                    let err = take_failure(&mut action);
                    self.checkpoint(ctx, step, StepStatus::Failed).await?;
                    self.mark_failed(format!(
                        "step {}/{} failed: {err}",
                        step.phase, step.name
                    ))
                    .await;
                    return Err(err);
                }
            }
        }

        self.mark_succeeded().await;
        Ok(())
    }

    /// Ordered step plan derived from the task's work.
    fn step_plan(&self) -> Vec<StepDef> {
        match &self.work {
            TaskWork::Setup { dest, .. } => {
                let mut steps = vec![StepDef {
                    phase: TaskPhase::SchemaSetup,
                    name: "create_object",
                    resource: ResourceKind::Metadata,
                }];
                if dest.is_partitioned() {
                    steps.push(StepDef {
                        phase: TaskPhase::SchemaSetup,
                        name: "declare_partitions",
                        resource: ResourceKind::Metadata,
                    });
                }
                steps
            }
            TaskWork::DataTransfer {
                staging, verify, ..
            } => {
                let mut steps = if staging.is_some() {
                    vec![
                        StepDef {
                            phase: TaskPhase::DataTransfer,
                            name: "prepare_staging",
                            resource: ResourceKind::Metadata,
                        },
                        StepDef {
                            phase: TaskPhase::DataTransfer,
                            name: "load",
                            resource: ResourceKind::DataTransfer,
                        },
                        StepDef {
                            phase: TaskPhase::DataTransfer,
                            name: "commit",
                            resource: ResourceKind::DataTransfer,
                        },
                    ]
                } else {
                    vec![
                        StepDef {
                            phase: TaskPhase::DataTransfer,
                            name: "truncate",
                            resource: ResourceKind::Metadata,
                        },
                        StepDef {
                            phase: TaskPhase::DataTransfer,
                            name: "load",
                            resource: ResourceKind::DataTransfer,
                        },
                    ]
                };
                if *verify {
                    steps.push(StepDef {
                        phase: TaskPhase::Verification,
                        name: "verify",
                        resource: ResourceKind::Verification,
                    });
                }
                steps
            }
            TaskWork::Cleanup { .. } => vec![StepDef {
                phase: TaskPhase::Cleanup,
                name: "drop_staging",
                resource: ResourceKind::Metadata,
            }],
        }
    }

    /// Builds the external call for one step.
    ///
    /// The future owns clones of the metadata snapshots so it can outlive the
    /// borrow of `self` while running on the runtime. DDL-shaped calls hold the
    /// destination object's named lock for the duration of the call.
    fn step_call<B>(
        &self,
        step: &'static str,
        backend: B,
        locks: ObjectLocks,
    ) -> Pin<Box<dyn Future<Output = MigResult<ActionReport>> + Send>>
    where
        B: Backend + Clone + Send + Sync + 'static,
    {
        match (&self.work, step) {
            (TaskWork::Setup { dest, .. }, "create_object") => {
                let dest = dest.clone();
                Box::pin(async move {
                    let _guard = locks.lock(&dest.qualified_name()).await;
                    backend.create_table(&dest).await?;
                    Ok(ActionReport::default())
                })
            }
            (
                TaskWork::Setup {
                    dest,
                    group_partitions,
                },
                "declare_partitions",
            ) => {
                let dest = dest.clone();
                let groups = group_partitions.clone();
                Box::pin(async move {
                    let _guard = locks.lock(&dest.qualified_name()).await;
                    for group in &groups {
                        if group.partitions.is_empty() {
                            continue;
                        }
                        backend.add_partitions(group, &group.partitions).await?;
                    }
                    Ok(ActionReport::default())
                })
            }
            (TaskWork::DataTransfer { dest, .. }, "truncate") => {
                let dest = dest.clone();
                Box::pin(async move {
                    let _guard = locks.lock(&dest.qualified_name()).await;
                    backend.truncate_table(&dest, &dest.partitions).await?;
                    Ok(ActionReport::default())
                })
            }
            (
                TaskWork::DataTransfer {
                    staging: Some(staging),
                    ..
                },
                "prepare_staging",
            ) => {
                let staging = staging.clone();
                Box::pin(async move {
                    let _guard = locks.lock(&staging.qualified_name()).await;
                    backend.create_table(&staging).await?;
                    backend.truncate_table(&staging, &[]).await?;
                    Ok(ActionReport::default())
                })
            }
            (
                TaskWork::DataTransfer {
                    source,
                    dest,
                    staging,
                    ..
                },
                "load",
            ) => {
                let source = source.clone();
                let target = staging.clone().unwrap_or_else(|| dest.clone());
                Box::pin(async move { backend.copy_data(&source, &target).await })
            }
            (
                TaskWork::DataTransfer {
                    dest,
                    staging: Some(staging),
                    ..
                },
                "commit",
            ) => {
                let staging = staging.clone();
                let dest = dest.clone();
                Box::pin(async move {
                    let _guard = locks.lock(&dest.qualified_name()).await;
                    backend.copy_data(&staging, &dest).await
                })
            }
            (TaskWork::DataTransfer { source, dest, .. }, "verify") => {
                let source = source.clone();
                let dest = dest.clone();
                Box::pin(async move { backend.verify_data(&source, &dest).await })
            }
            (TaskWork::Cleanup { staging }, "drop_staging") => {
                let staging = staging.clone();
                Box::pin(async move {
                    for table in &staging {
                        let _guard = locks.lock(&table.qualified_name()).await;
                        backend.drop_table(table).await?;
                    }
                    Ok(ActionReport::default())
                })
            }
            (_, step) => {
                let task_id = self.id.clone();
                let step = step.to_string();
                Box::pin(async move {
                    Err(mig_error!(
                        ErrorKind::InvalidState,
                        "Step does not belong to this task's plan",
                        format!("task {task_id}, step {step}")
                    ))
                })
            }
        }
    }

    /// Index of the first step that still has to run, based on the persisted
    /// checkpoint.
    async fn resume_index<S, B>(
        &self,
        ctx: &TaskContext<S, B>,
        steps: &[StepDef],
    ) -> MigResult<usize>
    where
        S: JobStore + Sync,
    {
        let Some(checkpoint) = ctx.store.get_task_checkpoint(&self.job_id, &self.id).await? else {
            return Ok(0);
        };

        let Some(position) = steps
            .iter()
            .position(|step| step.phase == checkpoint.phase && step.name == checkpoint.step)
        else {
            warn!(
                task_id = %self.id,
                phase = %checkpoint.phase,
                step = %checkpoint.step,
                "persisted sub-status does not match the current plan, restarting task"
            );
            return Ok(0);
        };

        match checkpoint.status {
            StepStatus::Done => Ok(position + 1),
            StepStatus::Doing | StepStatus::Failed => Ok(position),
        }
    }

    async fn checkpoint<S, B>(
        &self,
        ctx: &TaskContext<S, B>,
        step: &StepDef,
        status: StepStatus,
    ) -> MigResult<()>
    where
        S: JobStore + Sync,
    {
        let checkpoint = TaskCheckpoint::new(step.phase, step.name, status);
        ctx.store
            .put_task_checkpoint(&self.job_id, &self.id, &checkpoint)
            .await
    }

    /// Transitions `Pending → Running`; returns `false` when the task was
    /// stopped before it started.
    async fn mark_running(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.progress != TaskProgress::Pending {
            debug!(task_id = %self.id, progress = %state.progress, "run skipped");
            return false;
        }
        state.progress = TaskProgress::Running;
        state.started_at = Some(Utc::now());
        true
    }

    async fn mark_succeeded(&self) {
        let mut state = self.state.lock().await;
        if state.progress.is_terminal() {
            return;
        }
        state.progress = TaskProgress::Succeeded;
        state.ended_at = Some(Utc::now());
        info!(task_id = %self.id, "task succeeded");
    }

    async fn mark_failed(&self, reason: String) {
        let mut state = self.state.lock().await;
        if state.progress.is_terminal() {
            return;
        }
        state.progress = TaskProgress::Failed;
        state.ended_at = Some(Utc::now());
        state.failure = Some(reason);
    }

    async fn mark_canceled(&self) {
        let mut state = self.state.lock().await;
        if state.progress.is_terminal() {
            return;
        }
        state.progress = TaskProgress::Canceled;
        state.ended_at = Some(Utc::now());
    }

    async fn is_canceled(&self) -> bool {
        self.state.lock().await.progress == TaskProgress::Canceled
    }

    async fn enter_step(&self, step: &StepDef) {
        let mut state = self.state.lock().await;
        state.current_phase = Some(step.phase);
        state.current_step = Some(step.name);
        debug!(task_id = %self.id, phase = %step.phase, step = step.name, "entering step");
    }

    async fn register_abort(&self, action: &Action) {
        let mut state = self.state.lock().await;
        state.abort = action.abort_handle();
    }

    async fn clear_abort(&self) {
        let mut state = self.state.lock().await;
        state.abort = None;
    }

    /// Forces the progress state, bypassing the driver. Test-only.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn force_progress(&self, progress: TaskProgress) {
        let mut state = self.state.lock().await;
        state.progress = progress;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mig_config::shared::ResourceConfig;

    use crate::metadata::model::TableMeta;
    use crate::store::memory::MemoryJobStore;
    use crate::test_utils::backend::ScriptedBackend;

    fn transfer_task(verify: bool) -> Arc<Task> {
        Arc::new(Task::new(
            "job1.transfer",
            "job1",
            Vec::new(),
            TaskWork::DataTransfer {
                source: Arc::new(TableMeta::new("src_db", "events")),
                dest: Arc::new(TableMeta::new("dst_db", "events")),
                staging: None,
                verify,
            },
        ))
    }

    fn context(backend: ScriptedBackend) -> TaskContext<MemoryJobStore, ScriptedBackend> {
        TaskContext {
            store: MemoryJobStore::new(),
            backend,
            gate: ResourceGate::new(&ResourceConfig::default()),
            locks: ObjectLocks::new(),
        }
    }

    #[tokio::test]
    async fn transfer_runs_all_steps_and_checkpoints_done() {
        let backend = ScriptedBackend::new();
        let ctx = context(backend.clone());
        let task = transfer_task(true);

        task.run(&ctx).await.unwrap();

        assert_eq!(task.progress().await, TaskProgress::Succeeded);
        assert_eq!(backend.call_count("truncate_table"), 1);
        assert_eq!(backend.call_count("copy_data"), 1);
        assert_eq!(backend.call_count("verify_data"), 1);

        let checkpoint = ctx
            .store
            .get_task_checkpoint("job1", "job1.transfer")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.phase, TaskPhase::Verification);
        assert_eq!(checkpoint.step, "verify");
        assert_eq!(checkpoint.status, StepStatus::Done);
    }

    #[tokio::test]
    async fn resume_skips_steps_up_to_the_doing_checkpoint() {
        let backend = ScriptedBackend::new();
        let ctx = context(backend.clone());

        // A previous run crashed while loading: the truncate already happened.
        ctx.store
            .put_task_checkpoint(
                "job1",
                "job1.transfer",
                &TaskCheckpoint::new(TaskPhase::DataTransfer, "load", StepStatus::Doing),
            )
            .await
            .unwrap();

        let task = transfer_task(false);
        task.run(&ctx).await.unwrap();

        assert_eq!(task.progress().await, TaskProgress::Succeeded);
        assert_eq!(backend.call_count("truncate_table"), 0);
        assert_eq!(backend.call_count("copy_data"), 1);
    }

    #[tokio::test]
    async fn step_failure_marks_task_failed_with_failed_checkpoint() {
        let backend = ScriptedBackend::new();
        backend.fail_next("copy_data", 1);
        let ctx = context(backend.clone());

        let task = transfer_task(false);
        let err = task.run(&ctx).await.unwrap_err();

        assert_eq!(task.progress().await, TaskProgress::Failed);
        assert!(task.failure().await.is_some());
        assert_eq!(err.kind(), crate::error::ErrorKind::DestinationQueryFailed);

        let checkpoint = ctx
            .store
            .get_task_checkpoint("job1", "job1.transfer")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.step, "load");
        assert_eq!(checkpoint.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn stop_before_start_leaves_task_canceled() {
        let backend = ScriptedBackend::new();
        let ctx = context(backend.clone());

        let task = transfer_task(false);
        task.stop().await;
        task.run(&ctx).await.unwrap();

        assert_eq!(task.progress().await, TaskProgress::Canceled);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_interrupts_a_blocked_step() {
        let backend = ScriptedBackend::new();
        backend.block_next("copy_data", 1);
        let copy_entered = backend.notify_on("copy_data");
        let ctx = context(backend.clone());

        let task = transfer_task(false);
        let runner = {
            let task = task.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { task.run(&ctx).await })
        };

        copy_entered.notified().await;
        task.stop().await;

        runner.await.unwrap().unwrap();
        assert_eq!(task.progress().await, TaskProgress::Canceled);
    }
}
