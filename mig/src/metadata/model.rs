use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of warehouse systems a migration can read from or write to.
///
/// The orchestrator only classifies flows by system kind; concrete connectors
/// implementing the [`crate::metadata::MetaSource`] and [`crate::backend::Backend`]
/// traits are supplied by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    /// A Hive-style metastore-backed warehouse.
    Hive,
    /// A managed analytical warehouse.
    Warehouse,
    /// An object-storage backed archive (external tables over files).
    ObjectStore,
}

impl SystemKind {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            SystemKind::Hive => "hive",
            SystemKind::Warehouse => "warehouse",
            SystemKind::ObjectStore => "object_store",
        }
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// Scope of a migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A whole catalog (database); expands into one sub-job per table.
    Catalog,
    /// A single table; expands into one sub-job per partition when partitioned.
    Table,
    /// A single partition of a table. Only ever created as a sub-job.
    Partition,
}

impl ObjectType {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            ObjectType::Catalog => "catalog",
            ObjectType::Table => "table",
            ObjectType::Partition => "partition",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

impl TryFrom<&str> for ObjectType {
    type Error = crate::error::MigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "catalog" => Ok(ObjectType::Catalog),
            "table" => Ok(ObjectType::Table),
            "partition" => Ok(ObjectType::Partition),
            other => Err(crate::mig_error!(
                crate::error::ErrorKind::DeserializationError,
                "Unknown object type",
                other.to_string()
            )),
        }
    }
}

/// Schema column description.
///
/// Types are carried as opaque source-dialect names; translating them is the
/// concern of the schema transform, not the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Metadata snapshot of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    /// Partition column values, in partition-column order.
    pub values: Vec<String>,
    /// Data size in bytes. Absence disables adaptive grouping for the table.
    pub size_bytes: Option<u64>,
    /// Last modification time, when the source system tracks it.
    pub last_modified: Option<DateTime<Utc>>,
}

impl PartitionMeta {
    pub fn new(values: Vec<String>) -> Self {
        Self {
            values,
            size_bytes: None,
            last_modified: None,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }
}

/// Metadata snapshot of one table, optionally including its partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub catalog: String,
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    /// Empty for non-partitioned tables.
    pub partition_columns: Vec<ColumnMeta>,
    /// Filled only when the snapshot was taken with partitions.
    pub partitions: Vec<PartitionMeta>,
    /// Physical location for externally-mounted tables.
    pub location: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
}

impl TableMeta {
    pub fn new(catalog: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            name: name.into(),
            columns: Vec::new(),
            partition_columns: Vec::new(),
            partitions: Vec::new(),
            location: None,
            last_modified: None,
            size_bytes: None,
        }
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }

    /// Fully qualified `catalog.table` name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.catalog, self.name)
    }

    /// Returns a copy of this snapshot restricted to the given partitions.
    pub fn with_partitions(&self, partitions: Vec<PartitionMeta>) -> Self {
        Self {
            partitions,
            ..self.clone()
        }
    }
}

/// Builds the stable identifier of a partition inside its table.
///
/// Sub-jobs store this identifier as their source object name; it round-trips
/// through [`partition_values_from_identifier`].
pub fn partition_identifier(table: &str, values: &[String]) -> String {
    let mut identifier = String::from(table);
    for value in values {
        identifier.push('/');
        identifier.push_str(value);
    }
    identifier
}

/// Extracts the partition values from an identifier built by [`partition_identifier`].
pub fn partition_values_from_identifier(identifier: &str) -> Vec<String> {
    identifier
        .split('/')
        .skip(1)
        .map(ToString::to_string)
        .collect()
}
