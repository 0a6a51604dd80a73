use chrono::{DateTime, Utc};
use mig_config::shared::GroupingLimits;
use serde::{Deserialize, Serialize};

use crate::job::record::JobId;
use crate::metadata::model::{ObjectType, SystemKind};

/// Inclusive bounds over partition value vectors, compared lexicographically in
/// partition-column order. An empty bound leaves that side unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFilter {
    #[serde(default)]
    pub begin: Vec<String>,
    #[serde(default)]
    pub end: Vec<String>,
}

impl PartitionFilter {
    /// Whether the given partition values fall within the filter.
    pub fn matches(&self, values: &[String]) -> bool {
        if !self.begin.is_empty() && values < self.begin.as_slice() {
            return false;
        }
        if !self.end.is_empty() && values > self.end.as_slice() {
            return false;
        }
        true
    }
}

/// Submission record for a migration job.
///
/// This is the outward configuration surface: a serializable record carrying
/// everything needed to classify, plan, and execute the migration of one
/// catalog object. It is stored verbatim on the job record and inherited (with
/// adjusted object names) by generated sub-jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job identifier; generated when absent.
    #[serde(default)]
    pub id: Option<JobId>,
    pub source_system: SystemKind,
    pub dest_system: SystemKind,
    pub object_type: ObjectType,
    pub source_catalog: String,
    /// Source object name; for catalog jobs this equals the catalog name, for
    /// partition sub-jobs it is the partition identifier.
    pub source_object: String,
    pub dest_catalog: String,
    pub dest_object: String,
    /// Scheduling hint only; carries no ordering guarantee.
    #[serde(default)]
    pub priority: i32,
    /// Overrides the configured default when present.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub partition_filter: Option<PartitionFilter>,
    /// Overrides the configured grouping limits when present.
    #[serde(default)]
    pub grouping: Option<GroupingLimits>,
    /// Source object's last-modified time recorded at submission; the baseline
    /// for drift detection during reset.
    #[serde(default)]
    pub source_last_modified: Option<DateTime<Utc>>,
}

impl JobSpec {
    /// Creates a table-migration spec with defaults for the optional fields.
    pub fn table(
        source_system: SystemKind,
        dest_system: SystemKind,
        source_catalog: impl Into<String>,
        source_object: impl Into<String>,
        dest_catalog: impl Into<String>,
        dest_object: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source_system,
            dest_system,
            object_type: ObjectType::Table,
            source_catalog: source_catalog.into(),
            source_object: source_object.into(),
            dest_catalog: dest_catalog.into(),
            dest_object: dest_object.into(),
            priority: 0,
            max_attempts: None,
            partition_filter: None,
            grouping: None,
            source_last_modified: None,
        }
    }

    /// Derives the spec of a table sub-job under a catalog job.
    pub fn for_table(&self, id: JobId, table: &str) -> Self {
        Self {
            id: Some(id),
            object_type: ObjectType::Table,
            source_object: table.to_string(),
            dest_object: table.to_string(),
            source_last_modified: None,
            ..self.clone()
        }
    }

    /// Derives the spec of a partition sub-job under a table job.
    ///
    /// The partition identifier becomes the object name on both sides so the
    /// sub-job row is self-describing.
    pub fn for_partition(
        &self,
        id: JobId,
        identifier: &str,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Some(id),
            object_type: ObjectType::Partition,
            source_object: identifier.to_string(),
            dest_object: identifier.to_string(),
            source_last_modified: last_modified,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let filter = PartitionFilter {
            begin: values(&["2024-01"]),
            end: values(&["2024-06"]),
        };

        assert!(filter.matches(&values(&["2024-01"])));
        assert!(filter.matches(&values(&["2024-03"])));
        assert!(filter.matches(&values(&["2024-06"])));
        assert!(!filter.matches(&values(&["2023-12"])));
        assert!(!filter.matches(&values(&["2024-07"])));
    }

    #[test]
    fn empty_bounds_are_unbounded() {
        let filter = PartitionFilter::default();
        assert!(filter.matches(&values(&["anything"])));

        let lower_only = PartitionFilter {
            begin: values(&["2024-01"]),
            end: Vec::new(),
        };
        assert!(lower_only.matches(&values(&["2099-12"])));
        assert!(!lower_only.matches(&values(&["2023-12"])));
    }

    #[test]
    fn spec_round_trips_through_json() {
        let mut spec = JobSpec::table(
            SystemKind::Hive,
            SystemKind::Warehouse,
            "src_db",
            "events",
            "dst_db",
            "events",
        );
        spec.partition_filter = Some(PartitionFilter {
            begin: values(&["2024-01"]),
            end: Vec::new(),
        });

        let json = serde_json::to_string(&spec).unwrap();
        let parsed: JobSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn partition_sub_spec_keeps_flow_and_rewrites_object() {
        let spec = JobSpec::table(
            SystemKind::Hive,
            SystemKind::Warehouse,
            "src_db",
            "events",
            "dst_db",
            "events",
        );

        let sub = spec.for_partition("S_1".to_string(), "events/2024-01", None);

        assert_eq!(sub.object_type, ObjectType::Partition);
        assert_eq!(sub.source_object, "events/2024-01");
        assert_eq!(sub.source_system, spec.source_system);
        assert_eq!(sub.dest_catalog, spec.dest_catalog);
    }
}
