//! The scheduler loop: polls the job tree for executable tasks and dispatches
//! them to the worker pool under a concurrency cap.

use std::sync::Arc;
use std::time::Duration;

use mig_config::shared::OrchestratorConfig;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::concurrency::shutdown::ShutdownRx;
use crate::concurrency::signal::SignalRx;
use crate::error::MigResult;
use crate::job::status::JobStatus;
use crate::job::tree::JobTree;
use crate::metadata::source::MetaSource;
use crate::store::JobStore;
use crate::task::base::TaskContext;
use crate::workers::pool::TaskWorkerPool;

/// Drives scheduling: repeatedly asks every root job for its executable tasks
/// and hands each to a worker, until shutdown.
///
/// Polling is side-effect-light (DAG frontier plus predecessor checks); the
/// workers do the actual phase execution. Failed jobs with remaining attempts
/// are flipped back to pending on the next poll.
pub struct Scheduler<S, M, B> {
    tree: JobTree<S, M>,
    ctx: TaskContext<S, B>,
    pool: TaskWorkerPool,
    worker_permits: Arc<Semaphore>,
    config: Arc<OrchestratorConfig>,
    shutdown_rx: ShutdownRx,
    /// Fires when a submission or retry wants a pass before the next tick.
    wake_rx: SignalRx,
}

impl<S, M, B> Scheduler<S, M, B>
where
    S: JobStore + Clone + Send + Sync + 'static,
    M: MetaSource + Clone + Send + Sync + 'static,
    B: Backend + Clone + Send + Sync + 'static,
{
    pub fn new(
        tree: JobTree<S, M>,
        ctx: TaskContext<S, B>,
        pool: TaskWorkerPool,
        config: Arc<OrchestratorConfig>,
        shutdown_rx: ShutdownRx,
        wake_rx: SignalRx,
    ) -> Self {
        let worker_permits = Arc::new(Semaphore::new(config.max_task_workers as usize));
        Self {
            tree,
            ctx,
            pool,
            worker_permits,
            config,
            shutdown_rx,
            wake_rx,
        }
    }

    /// Runs the scheduling loop until shutdown is signaled.
    pub async fn run(mut self) -> MigResult<()> {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_task_workers = self.config.max_task_workers,
            "scheduler started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    info!("scheduler received shutdown signal");
                    break;
                }
                _ = self.wake_rx.changed() => {
                    debug!("scheduler woken for an immediate pass");
                }
                _ = interval.tick() => {}
            }

            if let Err(err) = self.poll_once().await {
                error!(error = %err, "scheduling pass failed");
            }
        }

        // In-flight workers are aborted; persisted running statuses make the
        // next start treat the work as interrupted, not failed.
        let mut inner = self.pool.lock().await;
        inner.abort_all();

        Ok(())
    }

    /// One scheduling pass over every root job.
    async fn poll_once(&self) -> MigResult<()> {
        for root_id in self.tree.root_jobs().await {
            let status = match self.tree.job_status(&root_id).await {
                Ok(status) => status,
                Err(err) => {
                    warn!(job_id = %root_id, error = %err, "skipping job in this pass");
                    continue;
                }
            };

            if status.is_terminal() {
                if status != JobStatus::Failed {
                    continue;
                }
                if self.tree.maybe_retry(&root_id).await? {
                    info!(job_id = %root_id, "failed job re-queued for another attempt");
                }
                // A failed job that is out of attempts may still owe its
                // best-effort cleanup vertex, so it is polled either way.
            }

            let tasks = self.tree.executable_tasks(&root_id).await?;
            if tasks.is_empty() {
                continue;
            }
            debug!(job_id = %root_id, tasks = tasks.len(), "executable tasks found");

            for task in tasks {
                let mut pool = self.pool.lock().await;
                if pool.has_active_worker(task.id()) {
                    continue;
                }

                // Worker cap reached: defer the rest to the next poll instead
                // of blocking the loop.
                let Ok(permit) = self.worker_permits.clone().try_acquire_owned() else {
                    debug!("worker cap reached, deferring remaining tasks");
                    return Ok(());
                };

                self.tree.on_task_started(task.job_id()).await?;

                let tree = self.tree.clone();
                let ctx = self.ctx.clone();
                let worker_task = task.clone();
                pool.spawn(task.id().to_string(), async move {
                    let _permit = permit;

                    // A step failure is job state, not a worker error: it is
                    // propagated into the tree and must not escape the pool.
                    if let Err(err) = worker_task.run(&ctx).await {
                        warn!(
                            task_id = %worker_task.id(),
                            error = %err,
                            "task finished with error"
                        );
                    }

                    if let Err(err) = tree.on_task_terminal(&worker_task).await {
                        error!(
                            task_id = %worker_task.id(),
                            error = %err,
                            "failed to propagate task outcome"
                        );
                    }

                    Ok(())
                });
            }
        }

        Ok(())
    }
}
