use std::sync::Arc;

use crate::task::base::{Task, TaskId, TaskKind};
use crate::task::progress::TaskProgress;

/// Directed acyclic graph of tasks expressing must-finish-before dependencies.
///
/// Represented as an arena of tasks plus predecessor index lists, so rebuilding
/// on reset is a plain swap and no task holds back-references into the graph.
/// Readiness is recomputed freshly on every poll rather than cached, which makes
/// the check idempotent across crashes.
#[derive(Debug, Default)]
pub struct TaskDag {
    tasks: Vec<Arc<Task>>,
    predecessors: Vec<Vec<usize>>,
}

impl TaskDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex and returns its index.
    pub fn add_task(&mut self, task: Arc<Task>) -> usize {
        self.tasks.push(task);
        self.predecessors.push(Vec::new());
        self.tasks.len() - 1
    }

    /// Adds a must-finish-before edge from `from` to `to`.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.predecessors[to].push(from);
    }

    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Arc<Task>> {
        self.tasks.iter().find(|task| task.id() == id)
    }

    /// Computes the currently executable frontier.
    ///
    /// A vertex is executable when it is pending and all predecessors have
    /// succeeded. Cleanup vertices only need their predecessors to be terminal:
    /// staging removal is best-effort and runs after partial transfer failure
    /// too (a stop request cancels the cleanup vertex along with everything
    /// else, so stopped jobs do not clean up).
    pub async fn executable_tasks(&self) -> Vec<Arc<Task>> {
        let mut ready = Vec::new();

        'vertices: for (index, task) in self.tasks.iter().enumerate() {
            if task.progress().await != TaskProgress::Pending {
                continue;
            }

            let cleanup = task.kind() == TaskKind::Cleanup;
            for &pred in &self.predecessors[index] {
                let progress = self.tasks[pred].progress().await;
                let satisfied = if cleanup {
                    progress.is_terminal()
                } else {
                    progress == TaskProgress::Succeeded
                };
                if !satisfied {
                    continue 'vertices;
                }
            }

            ready.push(task.clone());
        }

        ready
    }

    /// Cancels every vertex.
    pub async fn stop_all(&self) {
        for task in &self.tasks {
            task.stop().await;
        }
    }

    /// Whether every vertex reached a terminal state.
    pub async fn all_terminal(&self) -> bool {
        for task in &self.tasks {
            if !task.progress().await.is_terminal() {
                return false;
            }
        }
        true
    }

    /// Whether every vertex succeeded.
    pub async fn all_succeeded(&self) -> bool {
        for task in &self.tasks {
            if task.progress().await != TaskProgress::Succeeded {
                return false;
            }
        }
        true
    }

    /// Whether every data-transfer vertex reached a terminal state.
    pub async fn transfers_terminal(&self) -> bool {
        for task in &self.tasks {
            if task.kind() == TaskKind::DataTransfer && !task.progress().await.is_terminal() {
                return false;
            }
        }
        true
    }

    /// Ids of data-transfer vertices that failed.
    pub async fn failed_transfer_ids(&self) -> Vec<TaskId> {
        let mut failed = Vec::new();
        for task in &self.tasks {
            if task.kind() == TaskKind::DataTransfer
                && task.progress().await == TaskProgress::Failed
            {
                failed.push(task.id().to_string());
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::model::TableMeta;
    use crate::task::base::TaskWork;

    fn dummy_task(id: &str, kind: TaskKind) -> Arc<Task> {
        let meta = Arc::new(TableMeta::new("dst", "events"));
        let work = match kind {
            TaskKind::Setup => TaskWork::Setup {
                dest: meta,
                group_partitions: Vec::new(),
            },
            TaskKind::DataTransfer => TaskWork::DataTransfer {
                source: Arc::new(TableMeta::new("src", "events")),
                dest: meta,
                staging: None,
                verify: false,
            },
            TaskKind::Cleanup => TaskWork::Cleanup {
                staging: vec![meta],
            },
        };
        Arc::new(Task::new(id, "job1", Vec::new(), work))
    }

    fn transfer_dag() -> (TaskDag, Arc<Task>, Arc<Task>, Arc<Task>) {
        let setup = dummy_task("job1.setup", TaskKind::Setup);
        let t0 = dummy_task("job1.transfer.0", TaskKind::DataTransfer);
        let t1 = dummy_task("job1.transfer.1", TaskKind::DataTransfer);

        let mut dag = TaskDag::new();
        let s = dag.add_task(setup.clone());
        let a = dag.add_task(t0.clone());
        let b = dag.add_task(t1.clone());
        dag.add_edge(s, a);
        dag.add_edge(s, b);

        (dag, setup, t0, t1)
    }

    #[tokio::test]
    async fn only_roots_are_executable_initially() {
        let (dag, setup, _, _) = transfer_dag();

        let ready = dag.executable_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id(), setup.id());
    }

    #[tokio::test]
    async fn transfers_become_executable_once_setup_succeeded() {
        let (dag, setup, _, _) = transfer_dag();

        setup.force_progress(TaskProgress::Succeeded).await;

        let ready = dag.executable_tasks().await;
        let ids: Vec<&str> = ready.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["job1.transfer.0", "job1.transfer.1"]);
    }

    #[tokio::test]
    async fn running_setup_blocks_transfers() {
        let (dag, setup, _, _) = transfer_dag();

        setup.force_progress(TaskProgress::Running).await;

        assert!(dag.executable_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn cleanup_runs_after_partial_transfer_failure() {
        let (mut dag, setup, t0, t1) = transfer_dag();
        let cleanup = dummy_task("job1.cleanup", TaskKind::Cleanup);
        let c = dag.add_task(cleanup.clone());
        dag.add_edge(1, c);
        dag.add_edge(2, c);

        setup.force_progress(TaskProgress::Succeeded).await;
        t0.force_progress(TaskProgress::Succeeded).await;
        t1.force_progress(TaskProgress::Failed).await;

        let ready = dag.executable_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id(), cleanup.id());

        assert!(dag.transfers_terminal().await);
        assert_eq!(dag.failed_transfer_ids().await, vec!["job1.transfer.1"]);
    }

    #[tokio::test]
    async fn stop_all_cancels_pending_work() {
        let (dag, setup, t0, t1) = transfer_dag();

        dag.stop_all().await;

        assert_eq!(setup.progress().await, TaskProgress::Canceled);
        assert_eq!(t0.progress().await, TaskProgress::Canceled);
        assert_eq!(t1.progress().await, TaskProgress::Canceled);
        assert!(dag.all_terminal().await);
        assert!(dag.executable_tasks().await.is_empty());
    }
}
