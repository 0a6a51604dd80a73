use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ErrorKind, MigResult};
use crate::metadata::model::{PartitionMeta, TableMeta};
use crate::metadata::source::MetaSource;
use crate::mig_error;

#[derive(Debug, Default)]
struct Inner {
    /// Tables keyed by (catalog, table name).
    tables: BTreeMap<(String, String), TableMeta>,
}

/// In-memory [`MetaSource`] for tests.
///
/// Tables are registered up front with full partition metadata; tests mutate
/// them through [`StaticMetaSource::set_table`] to simulate upstream drift
/// (changed modification times, added or removed partitions).
#[derive(Debug, Clone, Default)]
pub struct StaticMetaSource {
    inner: Arc<Mutex<Inner>>,
}

impl StaticMetaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table, builder-style.
    pub fn with_table(self, table: TableMeta) -> Self {
        self.set_table(table);
        self
    }

    /// Inserts or replaces a table snapshot.
    pub fn set_table(&self, table: TableMeta) {
        let mut inner = self.lock_inner();
        inner
            .tables
            .insert((table.catalog.clone(), table.name.clone()), table);
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn table(&self, catalog: &str, table: &str) -> MigResult<TableMeta> {
        self.lock_inner()
            .tables
            .get(&(catalog.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| {
                mig_error!(
                    ErrorKind::MissingObject,
                    "Table not registered in test metadata",
                    format!("{catalog}.{table}")
                )
            })
    }
}

impl MetaSource for StaticMetaSource {
    async fn has_database(&self, catalog: &str) -> MigResult<bool> {
        let inner = self.lock_inner();
        Ok(inner.tables.keys().any(|(c, _)| c == catalog))
    }

    async fn has_table(&self, catalog: &str, table: &str) -> MigResult<bool> {
        let inner = self.lock_inner();
        Ok(inner
            .tables
            .contains_key(&(catalog.to_string(), table.to_string())))
    }

    async fn has_partition(
        &self,
        catalog: &str,
        table: &str,
        values: &[String],
    ) -> MigResult<bool> {
        let table = self.table(catalog, table)?;
        Ok(table
            .partitions
            .iter()
            .any(|partition| partition.values == values))
    }

    async fn list_databases(&self) -> MigResult<Vec<String>> {
        let inner = self.lock_inner();
        let mut databases: Vec<String> =
            inner.tables.keys().map(|(c, _)| c.clone()).collect();
        databases.dedup();
        Ok(databases)
    }

    async fn list_tables(&self, catalog: &str) -> MigResult<Vec<String>> {
        let inner = self.lock_inner();
        Ok(inner
            .tables
            .keys()
            .filter(|(c, _)| c == catalog)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn list_partitions(&self, catalog: &str, table: &str) -> MigResult<Vec<PartitionMeta>> {
        Ok(self.table(catalog, table)?.partitions)
    }

    async fn get_table_meta(
        &self,
        catalog: &str,
        table: &str,
        with_partitions: bool,
    ) -> MigResult<TableMeta> {
        let mut table = self.table(catalog, table)?;
        if !with_partitions {
            table.partitions.clear();
        }
        Ok(table)
    }

    async fn get_partition_meta(
        &self,
        catalog: &str,
        table: &str,
        values: &[String],
    ) -> MigResult<PartitionMeta> {
        let table = self.table(catalog, table)?;
        table
            .partitions
            .iter()
            .find(|partition| partition.values == values)
            .cloned()
            .ok_or_else(|| {
                mig_error!(
                    ErrorKind::MissingObject,
                    "Partition not registered in test metadata",
                    format!("{}.{} {:?}", table.catalog, table.name, values)
                )
            })
    }
}
