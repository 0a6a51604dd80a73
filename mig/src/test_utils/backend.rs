use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::action::ActionReport;
use crate::backend::Backend;
use crate::error::{ErrorKind, MigError, MigResult};
use crate::metadata::model::{PartitionMeta, TableMeta};
use crate::mig_error;
use crate::test_utils::notify::TimedNotify;

/// One recorded call against the scripted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateTable(String),
    AddPartitions(String, usize),
    TruncateTable(String),
    CopyData(String, String),
    VerifyData(String, String),
    DropTable(String),
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<BackendCall>,
    created: HashSet<String>,
    /// Remaining scripted failures per operation name.
    fail_scripts: HashMap<&'static str, u32>,
    /// Remaining scripted never-returning calls per operation name.
    block_scripts: HashMap<&'static str, u32>,
    /// Waiters notified whenever the operation is entered.
    call_notifies: HashMap<&'static str, Arc<Notify>>,
}

/// Scriptable in-memory [`Backend`] used as the reference implementation of
/// the external-call contract.
///
/// Records every call, honors create-if-not-exists semantics, and lets tests
/// inject failures (`fail_next`) or hangs (`block_next`) per operation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    inner: Arc<Mutex<Inner>>,
}

/// Outcome of the scripted bookkeeping for one call.
struct EnterOutcome {
    block: bool,
    failure: Option<MigError>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: &'static str, times: u32) {
        let mut inner = self.lock_inner();
        *inner.fail_scripts.entry(op).or_insert(0) += times;
    }

    /// Makes the next `times` calls of `op` hang until aborted.
    pub fn block_next(&self, op: &'static str, times: u32) {
        let mut inner = self.lock_inner();
        *inner.block_scripts.entry(op).or_insert(0) += times;
    }

    /// Returns a notifier that fires every time `op` is entered.
    pub fn notify_on(&self, op: &'static str) -> TimedNotify {
        let mut inner = self.lock_inner();
        let notify = inner
            .call_notifies
            .entry(op)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        TimedNotify::new(notify)
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock_inner().calls.clone()
    }

    /// Number of recorded calls of one operation.
    pub fn call_count(&self, op: &'static str) -> usize {
        let inner = self.lock_inner();
        inner
            .calls
            .iter()
            .filter(|call| op_name(call) == op)
            .count()
    }

    /// Names of the objects currently existing at the destination.
    pub fn existing_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.lock_inner().created.iter().cloned().collect();
        tables.sort();
        tables
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter_sync(&self, op: &'static str, call: BackendCall) -> EnterOutcome {
        let mut inner = self.lock_inner();
        inner.calls.push(call);

        if let Some(notify) = inner.call_notifies.get(op) {
            notify.notify_one();
        }

        if let Some(remaining) = inner.block_scripts.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return EnterOutcome {
                    block: true,
                    failure: None,
                };
            }
        }

        if let Some(remaining) = inner.fail_scripts.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return EnterOutcome {
                    block: false,
                    failure: Some(mig_error!(
                        ErrorKind::DestinationQueryFailed,
                        "Scripted backend failure",
                        op
                    )),
                };
            }
        }

        EnterOutcome {
            block: false,
            failure: None,
        }
    }

    async fn enter(&self, op: &'static str, call: BackendCall) -> MigResult<()> {
        let outcome = self.enter_sync(op, call);

        if outcome.block {
            // Hangs until the driving action is aborted.
            std::future::pending::<()>().await;
        }

        match outcome.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn op_name(call: &BackendCall) -> &'static str {
    match call {
        BackendCall::CreateTable(_) => "create_table",
        BackendCall::AddPartitions(_, _) => "add_partitions",
        BackendCall::TruncateTable(_) => "truncate_table",
        BackendCall::CopyData(_, _) => "copy_data",
        BackendCall::VerifyData(_, _) => "verify_data",
        BackendCall::DropTable(_) => "drop_table",
    }
}

impl Backend for ScriptedBackend {
    async fn create_table(&self, table: &TableMeta) -> MigResult<()> {
        let name = table.qualified_name();
        self.enter("create_table", BackendCall::CreateTable(name.clone()))
            .await?;

        // Create-if-not-exists: the second call is a no-op.
        let mut inner = self.lock_inner();
        inner.created.insert(name);
        Ok(())
    }

    async fn add_partitions(
        &self,
        table: &TableMeta,
        partitions: &[PartitionMeta],
    ) -> MigResult<()> {
        self.enter(
            "add_partitions",
            BackendCall::AddPartitions(table.qualified_name(), partitions.len()),
        )
        .await
    }

    async fn truncate_table(
        &self,
        table: &TableMeta,
        _partitions: &[PartitionMeta],
    ) -> MigResult<()> {
        self.enter(
            "truncate_table",
            BackendCall::TruncateTable(table.qualified_name()),
        )
        .await
    }

    async fn copy_data(&self, source: &TableMeta, dest: &TableMeta) -> MigResult<ActionReport> {
        self.enter(
            "copy_data",
            BackendCall::CopyData(source.qualified_name(), dest.qualified_name()),
        )
        .await?;

        let rows = source.partitions.len().max(1) as u64;
        Ok(ActionReport {
            rows_copied: Some(rows),
            message: None,
        })
    }

    async fn verify_data(&self, source: &TableMeta, dest: &TableMeta) -> MigResult<ActionReport> {
        self.enter(
            "verify_data",
            BackendCall::VerifyData(source.qualified_name(), dest.qualified_name()),
        )
        .await?;

        Ok(ActionReport::default())
    }

    async fn drop_table(&self, table: &TableMeta) -> MigResult<()> {
        let name = table.qualified_name();
        self.enter("drop_table", BackendCall::DropTable(name.clone()))
            .await?;

        let mut inner = self.lock_inner();
        inner.created.remove(&name);
        Ok(())
    }
}
