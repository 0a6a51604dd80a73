use std::future::Future;

use crate::action::ActionReport;
use crate::error::MigResult;
use crate::metadata::model::{PartitionMeta, TableMeta};

/// Trait for systems that execute the external calls actions wrap.
///
/// [`Backend`] implementations define how destination objects are created and how
/// bulk data moves between systems. Every operation must be idempotent: the
/// orchestrator re-runs a step whose persisted sub-status was left at `doing`
/// after a crash, so a second invocation has to converge to the same destination
/// state (create-if-not-exists, overwrite-on-copy, drop-if-exists).
///
/// Concrete connectors (SQL dialects, object-storage I/O, credential handling)
/// live outside the orchestrator; the in-memory test backend is the reference
/// implementation of this contract.
pub trait Backend {
    /// Creates the destination object if it does not exist yet.
    fn create_table(&self, table: &TableMeta) -> impl Future<Output = MigResult<()>> + Send;

    /// Declares the given partitions on the destination object.
    ///
    /// Already-declared partitions are skipped.
    fn add_partitions(
        &self,
        table: &TableMeta,
        partitions: &[PartitionMeta],
    ) -> impl Future<Output = MigResult<()>> + Send;

    /// Truncates the destination object, or only the given partitions when the
    /// slice is non-empty.
    fn truncate_table(
        &self,
        table: &TableMeta,
        partitions: &[PartitionMeta],
    ) -> impl Future<Output = MigResult<()>> + Send;

    /// Copies the data selected by `source` (honoring its partition subset) into
    /// `dest`, overwriting whatever overlapping data is already there.
    fn copy_data(
        &self,
        source: &TableMeta,
        dest: &TableMeta,
    ) -> impl Future<Output = MigResult<ActionReport>> + Send;

    /// Compares source and destination contents for the covered partitions.
    ///
    /// A mismatch is reported as an error, not as a report.
    fn verify_data(
        &self,
        source: &TableMeta,
        dest: &TableMeta,
    ) -> impl Future<Output = MigResult<ActionReport>> + Send;

    /// Drops an object if it exists. Used for best-effort staging cleanup.
    fn drop_table(&self, table: &TableMeta) -> impl Future<Output = MigResult<()>> + Send;
}
