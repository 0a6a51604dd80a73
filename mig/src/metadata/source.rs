use std::future::Future;

use crate::error::MigResult;
use crate::metadata::model::{PartitionMeta, TableMeta};

/// Trait for reading catalog metadata from a source system.
///
/// [`MetaSource`] implementations wrap one concrete system's catalog API (a Hive
/// metastore, a warehouse SDK, a file-listing over object storage). The
/// orchestrator only ever reads through this surface; it never mutates source
/// metadata.
///
/// Implementations should ensure thread-safety and tolerate concurrent calls
/// from multiple planning passes.
pub trait MetaSource {
    /// Returns whether a database (catalog) with the given name exists.
    fn has_database(&self, catalog: &str) -> impl Future<Output = MigResult<bool>> + Send;

    /// Returns whether the given table exists.
    fn has_table(&self, catalog: &str, table: &str)
    -> impl Future<Output = MigResult<bool>> + Send;

    /// Returns whether the given partition exists.
    fn has_partition(
        &self,
        catalog: &str,
        table: &str,
        values: &[String],
    ) -> impl Future<Output = MigResult<bool>> + Send;

    /// Lists all database names visible to the connector.
    fn list_databases(&self) -> impl Future<Output = MigResult<Vec<String>>> + Send;

    /// Lists all table names in the given database.
    fn list_tables(&self, catalog: &str) -> impl Future<Output = MigResult<Vec<String>>> + Send;

    /// Lists partition metadata for the given table.
    ///
    /// Returns an empty list for non-partitioned tables.
    fn list_partitions(
        &self,
        catalog: &str,
        table: &str,
    ) -> impl Future<Output = MigResult<Vec<PartitionMeta>>> + Send;

    /// Returns the table metadata snapshot, with or without partitions.
    ///
    /// Fetching without partitions is cheaper and sufficient for drift checks
    /// against the table's last-modified time.
    fn get_table_meta(
        &self,
        catalog: &str,
        table: &str,
        with_partitions: bool,
    ) -> impl Future<Output = MigResult<TableMeta>> + Send;

    /// Returns the metadata of one partition.
    ///
    /// The returned size is optional; its absence is the signal that disables
    /// adaptive grouping.
    fn get_partition_meta(
        &self,
        catalog: &str,
        table: &str,
        values: &[String],
    ) -> impl Future<Output = MigResult<PartitionMeta>> + Send;
}
