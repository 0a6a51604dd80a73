//! The smallest schedulable unit: one external call behind a uniform progress
//! state machine and an admission-controlled resource reservation.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error};

use crate::error::{ErrorKind, MigError, MigResult};
use crate::mig_error;
use crate::resource::{ResourceDemand, ResourceGate, ResourceGrant};

/// Progress state of an action.
///
/// Transitions: `Pending → Running → {Succeeded, Failed, Canceled}`. Terminal
/// states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionProgress {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ActionProgress {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionProgress::Succeeded | ActionProgress::Failed | ActionProgress::Canceled
        )
    }

    pub fn as_static_str(&self) -> &'static str {
        match self {
            ActionProgress::Pending => "pending",
            ActionProgress::Running => "running",
            ActionProgress::Succeeded => "succeeded",
            ActionProgress::Failed => "failed",
            ActionProgress::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ActionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// Opaque result of an action's external call, surfaced for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    /// Rows moved by a copy, when the backend reports them.
    pub rows_copied: Option<u64>,
    /// Free-text summary from the backend.
    pub message: Option<String>,
}

/// One external call wrapped in a progress state machine and a resource
/// reservation.
///
/// An action is created immediately before its step executes and dropped once
/// the owning task consumed its result. The owning task driver observes every
/// terminal transition through [`Action::wait`] and recomputes its own status.
#[derive(Debug)]
pub struct Action {
    id: String,
    task_id: String,
    demand: ResourceDemand,
    grant: Option<ResourceGrant>,
    progress: ActionProgress,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    handle: Option<JoinHandle<MigResult<ActionReport>>>,
    outcome: Option<MigResult<ActionReport>>,
}

impl Action {
    /// Creates a pending action with the declared resource demand.
    pub fn new(id: impl Into<String>, task_id: impl Into<String>, demand: ResourceDemand) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            demand,
            grant: None,
            progress: ActionProgress::Pending,
            started_at: None,
            ended_at: None,
            handle: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn progress(&self) -> ActionProgress {
        self.progress
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Structured result-or-error once the action reached a terminal state.
    pub fn outcome(&self) -> Option<&MigResult<ActionReport>> {
        self.outcome.as_ref()
    }

    /// Attempts to deduct the declared demand from the gate.
    ///
    /// Non-blocking: returns `false` without side effects when capacity is
    /// insufficient, in which case the caller re-polls later.
    pub async fn try_reserve(&mut self, gate: &ResourceGate) -> bool {
        if self.grant.is_some() {
            return true;
        }

        match gate.try_allocate(&self.id, &self.demand).await {
            Some(grant) => {
                self.grant = Some(grant);
                true
            }
            None => false,
        }
    }

    /// Returns any held reservation to the gate.
    ///
    /// Idempotent: the grant is taken out of the action on the first call.
    pub async fn release(&mut self, gate: &ResourceGate) {
        if let Some(grant) = self.grant.take() {
            gate.release(&self.id, grant).await;
        }
    }

    /// Starts the external call asynchronously.
    ///
    /// Transitions `Pending → Running` and records the start time. The call runs
    /// on the runtime so the task driver is never blocked on network I/O.
    pub fn execute<F>(&mut self, call: F)
    where
        F: Future<Output = MigResult<ActionReport>> + Send + 'static,
    {
        if self.progress != ActionProgress::Pending {
            debug!(action_id = %self.id, progress = %self.progress, "execute ignored");
            return;
        }

        self.set_progress(ActionProgress::Running);
        self.handle = Some(tokio::spawn(call));
    }

    /// Handle used to interrupt the in-flight call without holding the action.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.handle.as_ref().map(JoinHandle::abort_handle)
    }

    /// Returns whether the underlying call has completed, independent of success.
    pub fn is_finished(&self) -> bool {
        if self.progress.is_terminal() {
            return true;
        }

        self.handle
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }

    /// Waits for the external call and records the terminal transition.
    pub async fn wait(&mut self) -> ActionProgress {
        if self.progress.is_terminal() {
            return self.progress;
        }

        let Some(handle) = self.handle.take() else {
            // Not executed: a stop request before execution leaves it canceled.
            self.set_progress(ActionProgress::Canceled);
            self.outcome = Some(Err(mig_error!(
                ErrorKind::Interrupted,
                "Action canceled before execution"
            )));
            return self.progress;
        };

        match handle.await {
            Ok(Ok(report)) => {
                self.outcome = Some(Ok(report));
                self.set_progress(ActionProgress::Succeeded);
            }
            Ok(Err(err)) => {
                error!(action_id = %self.id, error = %err, "action failed");
                self.outcome = Some(Err(err));
                self.set_progress(ActionProgress::Failed);
            }
            Err(join_err) if join_err.is_cancelled() => {
                self.outcome = Some(Err(mig_error!(
                    ErrorKind::Interrupted,
                    "Action interrupted by stop request"
                )));
                self.set_progress(ActionProgress::Canceled);
            }
            Err(join_err) => {
                error!(action_id = %self.id, error = %join_err, "action panicked");
                self.outcome = Some(Err(mig_error!(
                    ErrorKind::TaskWorkerPanic,
                    "Action panicked",
                    join_err
                )));
                self.set_progress(ActionProgress::Failed);
            }
        }

        self.progress
    }

    /// Cancels the action, interrupting the underlying call if it is in flight.
    ///
    /// Terminal once set; further transitions are ignored.
    pub fn stop(&mut self) {
        if self.progress.is_terminal() {
            debug!(action_id = %self.id, "stop on terminated action ignored");
            return;
        }

        if let Some(handle) = &self.handle {
            handle.abort();
        }

        if self.outcome.is_none() {
            self.outcome = Some(Err(mig_error!(
                ErrorKind::Interrupted,
                "Action interrupted by stop request"
            )));
        }

        self.set_progress(ActionProgress::Canceled);
    }

    fn set_progress(&mut self, progress: ActionProgress) {
        if self.progress == progress {
            return;
        }

        debug!(
            action_id = %self.id,
            from = %self.progress,
            to = %progress,
            "set action progress"
        );

        if self.progress == ActionProgress::Pending && progress == ActionProgress::Running {
            self.started_at = Some(Utc::now());
        }

        self.progress = progress;

        if self.progress.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// Extracts the error out of a terminal action, normalizing the missing-outcome
/// case.
pub(crate) fn take_failure(action: &mut Action) -> MigError {
    match action.outcome.take() {
        Some(Err(err)) => err,
        _ => mig_error!(
            ErrorKind::Unknown,
            "Action reached a terminal state without a recorded error"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mig_config::shared::ResourceConfig;
    use std::time::Duration;
    use tokio::time::sleep;

    use crate::resource::ResourceKind;

    fn demand() -> ResourceDemand {
        ResourceDemand::from([(ResourceKind::Metadata, 1)])
    }

    #[tokio::test]
    async fn successful_action_records_timestamps_once() {
        let mut action = Action::new("a1", "t1", ResourceDemand::new());

        assert_eq!(action.progress(), ActionProgress::Pending);
        action.execute(async { Ok(ActionReport::default()) });
        assert_eq!(action.progress(), ActionProgress::Running);
        let started_at = action.started_at();
        assert!(started_at.is_some());

        assert_eq!(action.wait().await, ActionProgress::Succeeded);
        assert_eq!(action.started_at(), started_at);
        assert!(action.ended_at().is_some());
        assert!(action.outcome().is_some_and(|outcome| outcome.is_ok()));
    }

    #[tokio::test]
    async fn failed_call_marks_action_failed() {
        let mut action = Action::new("a1", "t1", ResourceDemand::new());

        action.execute(async {
            Err(mig_error!(ErrorKind::SourceQueryFailed, "query exploded"))
        });

        assert_eq!(action.wait().await, ActionProgress::Failed);
        assert!(action.outcome().is_some_and(|outcome| outcome.is_err()));
    }

    #[tokio::test]
    async fn stop_interrupts_in_flight_call() {
        let mut action = Action::new("a1", "t1", ResourceDemand::new());

        action.execute(async {
            sleep(Duration::from_secs(60)).await;
            Ok(ActionReport::default())
        });

        action.stop();
        assert_eq!(action.wait().await, ActionProgress::Canceled);

        // Terminal once set: further transitions are ignored.
        action.stop();
        assert_eq!(action.progress(), ActionProgress::Canceled);
        assert!(
            action
                .outcome()
                .is_some_and(|outcome| outcome
                    .as_ref()
                    .is_err_and(|err| err.kind() == ErrorKind::Interrupted))
        );
    }

    #[tokio::test]
    async fn reserve_and_release_round_trip() {
        let gate = ResourceGate::new(&ResourceConfig {
            data_transfer_workers: 1,
            metadata_workers: 1,
            verification_workers: 1,
        });
        let mut action = Action::new("a1", "t1", demand());
        let mut blocked = Action::new("a2", "t2", demand());

        assert!(action.try_reserve(&gate).await);
        // Reserving twice is a no-op on capacity.
        assert!(action.try_reserve(&gate).await);
        assert!(!blocked.try_reserve(&gate).await);

        action.release(&gate).await;
        // Releasing again must not double-credit the gate.
        action.release(&gate).await;
        assert!(blocked.try_reserve(&gate).await);
        assert!(!action.try_reserve(&gate).await);
    }
}
