//! The orchestrator facade: owns the job tree, the admission gate, and the
//! scheduler, and exposes the submission/control surface.

use std::sync::Arc;

use mig_config::shared::OrchestratorConfig;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backend::Backend;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};
use crate::error::{ErrorKind, MigResult};
use crate::job::record::{JobId, JobRecord};
use crate::job::registry::FlowRegistry;
use crate::job::spec::JobSpec;
use crate::job::status::JobStatus;
use crate::job::tree::JobTree;
use crate::metadata::source::MetaSource;
use crate::mig_error;
use crate::resource::{ObjectLocks, ResourceGate};
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use crate::task::base::{TaskContext, TaskStatusView};
use crate::workers::pool::TaskWorkerPool;

/// Lifecycle state of the orchestrator.
enum OrchestratorState {
    NotStarted,
    Started {
        scheduler: JoinHandle<MigResult<()>>,
    },
}

/// Single-instance owner of the migration job tree.
///
/// Construction wires every collaborator explicitly: the job store, the
/// metadata source, the execution backend, the flow registry, and the shared
/// resource gate. Nothing is looked up through globals.
pub struct Orchestrator<S, M, B> {
    config: Arc<OrchestratorConfig>,
    tree: JobTree<S, M>,
    ctx: TaskContext<S, B>,
    pool: TaskWorkerPool,
    shutdown_tx: ShutdownTx,
    /// Wakes the scheduler for an immediate pass after submissions/retries.
    wake_tx: SignalTx,
    wake_rx: Option<SignalRx>,
    state: OrchestratorState,
}

impl<S, M, B> Orchestrator<S, M, B>
where
    S: JobStore + Clone + Send + Sync + 'static,
    M: MetaSource + Clone + Send + Sync + 'static,
    B: Backend + Clone + Send + Sync + 'static,
{
    /// Creates an orchestrator with the default flow registry.
    pub fn new(config: OrchestratorConfig, store: S, meta: M, backend: B) -> MigResult<Self> {
        Self::with_registry(config, store, meta, backend, FlowRegistry::with_default_flows())
    }

    /// Creates an orchestrator with a custom flow registry.
    pub fn with_registry(
        config: OrchestratorConfig,
        store: S,
        meta: M,
        backend: B,
        registry: FlowRegistry,
    ) -> MigResult<Self> {
        config
            .validate()
            .map_err(|err| mig_error!(ErrorKind::ConfigError, "Invalid configuration", err))?;

        let config = Arc::new(config);
        let gate = ResourceGate::new(&config.resources);
        let locks = ObjectLocks::new();
        let tree = JobTree::new(store.clone(), meta, Arc::new(registry), config.clone());
        let ctx = TaskContext {
            store,
            backend,
            gate,
            locks,
        };
        let (shutdown_tx, _) = create_shutdown_channel();
        let (wake_tx, wake_rx) = create_signal();

        Ok(Self {
            config,
            tree,
            ctx,
            pool: TaskWorkerPool::new(),
            shutdown_tx,
            wake_tx,
            wake_rx: Some(wake_rx),
            state: OrchestratorState::NotStarted,
        })
    }

    /// Loads persisted jobs, recovers interrupted ones, and starts the
    /// scheduler loop.
    pub async fn start(&mut self) -> MigResult<()> {
        if matches!(self.state, OrchestratorState::Started { .. }) {
            return Ok(());
        }

        info!("starting migration orchestrator");

        self.tree.load().await?;
        self.tree.recover_interrupted().await?;

        let wake_rx = match self.wake_rx.take() {
            Some(wake_rx) => wake_rx,
            None => self.wake_tx.subscribe(),
        };
        let scheduler = Scheduler::new(
            self.tree.clone(),
            self.ctx.clone(),
            self.pool.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
            wake_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        self.state = OrchestratorState::Started { scheduler: handle };
        Ok(())
    }

    /// Submits a migration request and returns the root job id.
    pub async fn submit(&self, spec: JobSpec) -> MigResult<JobId> {
        let job_id = self.tree.submit(spec).await?;
        self.wake_scheduler();
        Ok(job_id)
    }

    /// Aggregation-corrected status of one job.
    pub async fn job_status(&self, id: &str) -> MigResult<JobStatus> {
        self.tree.job_status(id).await
    }

    /// Info / failure reason of one job.
    pub async fn job_info(&self, id: &str) -> MigResult<String> {
        self.tree.job_info(id).await
    }

    /// Clone of one job record, for observability surfaces.
    pub async fn job_record(&self, id: &str) -> MigResult<JobRecord> {
        self.tree.job_record(id).await
    }

    /// Snapshots of a job's in-memory tasks, for status surfaces.
    pub async fn job_tasks(&self, id: &str) -> MigResult<Vec<TaskStatusView>> {
        self.tree.job_tasks(id).await
    }

    /// Manually retries a failed/canceled job while attempts remain.
    pub async fn retry_job(&self, id: &str) -> MigResult<bool> {
        let retried = self.tree.retry(id).await?;
        if retried {
            self.wake_scheduler();
        }
        Ok(retried)
    }

    /// Resets a terminal job, re-checking the source object for drift.
    pub async fn reset_job(&self, id: &str, force: bool) -> MigResult<bool> {
        let reset = self.tree.reset(id, force).await?;
        if reset {
            self.wake_scheduler();
        }
        Ok(reset)
    }

    /// Nudges the scheduler into an immediate pass.
    fn wake_scheduler(&self) {
        // An error only means the scheduler is not running yet (or anymore);
        // the next start polls everything regardless.
        let _ = self.wake_tx.send(());
    }

    /// Stops a job, cascading through its tasks and sub-jobs.
    pub async fn stop_job(&self, id: &str) -> MigResult<()> {
        self.tree.stop(id).await
    }

    /// Signals shutdown to the scheduler and every worker.
    pub fn shutdown(&self) {
        info!("trying to shut down the orchestrator");

        if self.shutdown_tx.shutdown().is_err() {
            // No receiver left: everything already exited.
            info!("no active workers to signal");
        }
    }

    /// Waits for the scheduler and all task workers to finish.
    pub async fn wait(self) -> MigResult<()> {
        let OrchestratorState::Started { scheduler } = self.state else {
            info!("orchestrator was not started, nothing to wait for");
            return Ok(());
        };

        match scheduler.await {
            Ok(result) => result?,
            Err(join_err) => {
                error!(error = %join_err, "scheduler terminated abnormally");
                return Err(mig_error!(
                    ErrorKind::TaskWorkerPanic,
                    "Scheduler panicked",
                    join_err
                ));
            }
        }

        self.pool.wait_all().await
    }

    /// Convenience wrapper: signal shutdown, then wait for the drain.
    pub async fn shutdown_and_wait(self) -> MigResult<()> {
        self.shutdown();
        self.wait().await
    }
}
