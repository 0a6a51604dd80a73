use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, MigResult};
use crate::mig_error;
use crate::task::base::TaskId;

/// Internal state for [`TaskWorkerPool`].
#[derive(Debug, Default)]
pub struct TaskWorkerPoolInner {
    /// Currently active task workers indexed by task id.
    active: HashMap<TaskId, AbortHandle>,
    /// Owns all spawned worker tasks.
    join_set: JoinSet<(TaskId, MigResult<()>)>,
}

impl TaskWorkerPoolInner {
    /// Spawns and tracks a worker driving one task.
    ///
    /// If a worker for the task already exists and is still running, logs a
    /// warning and skips insertion. Callers should check [`Self::has_active_worker`]
    /// before calling.
    pub fn spawn<F>(&mut self, task_id: TaskId, future: F)
    where
        F: Future<Output = MigResult<()>> + Send + 'static,
    {
        match self.active.entry(task_id.clone()) {
            Entry::Vacant(entry) => {
                let id = task_id.clone();
                let abort_handle = self.join_set.spawn(async move {
                    let result = future.await;
                    (id, result)
                });
                entry.insert(abort_handle);

                debug!(task_id = %task_id, "spawned worker in pool");
            }
            Entry::Occupied(entry) => {
                if entry.get().is_finished() {
                    let id = task_id.clone();
                    let abort_handle = self.join_set.spawn(async move {
                        let result = future.await;
                        (id, result)
                    });
                    entry.remove();
                    self.active.insert(task_id.clone(), abort_handle);

                    debug!(task_id = %task_id, "replaced finished worker in pool");
                } else {
                    warn!(task_id = %task_id, "worker already exists in pool and is still running");
                }
            }
        }
    }

    /// Checks if an active worker exists for the given task.
    pub fn has_active_worker(&self, task_id: &str) -> bool {
        self.active
            .get(task_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Aborts every in-flight worker.
    pub fn abort_all(&mut self) {
        for handle in self.active.values() {
            handle.abort();
        }
    }
}

/// Pool coordinating the task workers spawned by the scheduler.
///
/// Each worker drives one task through its phase state machine to completion or
/// failure. The pool tracks liveness per task id and aggregates worker errors
/// when waiting for the drain.
#[derive(Debug, Clone, Default)]
pub struct TaskWorkerPool {
    inner: Arc<Mutex<TaskWorkerPoolInner>>,
}

impl TaskWorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for all active task workers to complete.
    ///
    /// Worker errors are collected and returned aggregated; a worker that
    /// panicked surfaces as a [`ErrorKind::TaskWorkerPanic`] error.
    pub async fn wait_all(&self) -> MigResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut inner = self.inner.lock().await;
                inner.join_set.join_next().await
            };

            let Some(result) = result else {
                // JoinSet is empty, all workers have completed.
                break;
            };

            match result {
                Ok((task_id, worker_result)) => {
                    let mut inner = self.inner.lock().await;
                    inner.active.remove(&task_id);

                    if let Err(err) = worker_result {
                        error!(task_id = %task_id, error = %err, "worker completed with error");
                        errors.push(err);
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("worker task was cancelled");
                    } else {
                        errors.push(mig_error!(
                            ErrorKind::TaskWorkerPanic,
                            "Task worker panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        {
            let mut inner = self.inner.lock().await;
            inner.active.clear();
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Deref for TaskWorkerPool {
    type Target = Mutex<TaskWorkerPoolInner>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
