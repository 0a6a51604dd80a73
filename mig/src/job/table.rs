//! Per-table planning: binds pending partition sub-jobs into transfer groups
//! and expands them into the job's task DAG.

use std::sync::Arc;

use mig_config::shared::GroupingLimits;
use tracing::{debug, info};

use crate::error::MigResult;
use crate::grouping::{adaptive_groups, static_groups};
use crate::job::record::{JobId, JobRecord};
use crate::job::registry::FlowSpec;
use crate::metadata::model::{TableMeta, partition_values_from_identifier};
use crate::metadata::source::MetaSource;
use crate::metadata::transform::staging_meta;
use crate::task::base::{Task, TaskId, TaskWork};
use crate::task::dag::TaskDag;

/// Ephemeral binding of {source subset, destination subset, backing sub-jobs}
/// used only while building a DAG.
///
/// The union of all groups' backing sub-jobs for one table job equals exactly
/// the table's pending partition sub-jobs, with no overlap.
#[derive(Debug)]
pub struct TablePartitionGroup {
    pub source: TableMeta,
    pub dest: TableMeta,
    pub sub_job_ids: Vec<JobId>,
}

/// Stable key of a data-transfer task.
///
/// Keys address the backing sub-job set rather than a positional index so a
/// rebuilt DAG over the same pending partitions resumes the same persisted
/// sub-statuses, while a changed pending set gets fresh keys.
pub(crate) fn transfer_task_key(job_id: &str, sub_job_ids: &[JobId]) -> TaskId {
    if sub_job_ids.is_empty() {
        return format!("{job_id}.transfer");
    }

    let mut sorted: Vec<&str> = sub_job_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{job_id}.transfer.{:016x}", fnv1a(&sorted.join("+")))
}

/// FNV-1a, used only to shorten transfer task keys deterministically.
fn fnv1a(data: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Bins the table's pending partition sub-jobs into transfer groups.
///
/// A non-partitioned table, or a table with zero pending partitions, yields
/// exactly one group spanning the whole table. Otherwise the adaptive pass runs
/// first and falls back to static grouping when any partition size is unknown.
pub(crate) async fn partition_groups<M>(
    meta: &M,
    source: &TableMeta,
    dest: &TableMeta,
    pending_sub_jobs: &[JobRecord],
    limits: &GroupingLimits,
) -> MigResult<Vec<TablePartitionGroup>>
where
    M: MetaSource,
{
    if !source.is_partitioned() || pending_sub_jobs.is_empty() {
        debug!(
            table = %source.qualified_name(),
            partitioned = source.is_partitioned(),
            pending = pending_sub_jobs.len(),
            "whole-table partition group"
        );
        return Ok(vec![TablePartitionGroup {
            source: source.clone(),
            dest: dest.clone(),
            sub_job_ids: Vec::new(),
        }]);
    }

    let mut partitions = Vec::with_capacity(pending_sub_jobs.len());
    for sub_job in pending_sub_jobs {
        let values = partition_values_from_identifier(&sub_job.spec.source_object);
        let partition = meta
            .get_partition_meta(&source.catalog, &source.name, &values)
            .await?;
        partitions.push(partition);
    }

    let index_groups = match adaptive_groups(&partitions, limits) {
        Some(groups) => groups,
        None => {
            info!(
                table = %source.qualified_name(),
                "partition sizes unavailable, falling back to static grouping"
            );
            static_groups(partitions.len(), limits.max_partitions_per_group)
        }
    };

    let groups = index_groups
        .into_iter()
        .map(|indices| {
            let group_partitions: Vec<_> =
                indices.iter().map(|&i| partitions[i].clone()).collect();
            TablePartitionGroup {
                source: source.with_partitions(group_partitions.clone()),
                dest: dest.with_partitions(group_partitions),
                sub_job_ids: indices
                    .iter()
                    .map(|&i| pending_sub_jobs[i].id.clone())
                    .collect(),
            }
        })
        .collect();

    Ok(groups)
}

/// Expands one table job into its task DAG.
///
/// Shape: one setup vertex feeding one data-transfer vertex per partition group
/// (a single transfer for non-partitioned tables); for staging flows, one
/// cleanup vertex fed by every transfer vertex.
pub(crate) async fn build_table_dag<M>(
    record: &JobRecord,
    flow: FlowSpec,
    meta: &M,
    source: &TableMeta,
    dest: &TableMeta,
    pending_sub_jobs: &[JobRecord],
    limits: &GroupingLimits,
) -> MigResult<TaskDag>
where
    M: MetaSource,
{
    let groups = partition_groups(meta, source, dest, pending_sub_jobs, limits).await?;
    let dest_base = Arc::new(dest.with_partitions(Vec::new()));

    let group_dests: Vec<Arc<TableMeta>> = groups
        .iter()
        .map(|group| Arc::new(group.dest.clone()))
        .collect();

    let mut dag = TaskDag::new();

    let setup = Arc::new(Task::new(
        format!("{}.setup", record.id),
        record.id.clone(),
        Vec::new(),
        TaskWork::Setup {
            dest: dest_base.clone(),
            group_partitions: group_dests,
        },
    ));
    let setup_index = dag.add_task(setup);

    let mut stagings = Vec::new();
    let mut transfer_indices = Vec::new();
    for (ordinal, group) in groups.iter().enumerate() {
        let staging = flow.uses_staging.then(|| {
            let staging = Arc::new(staging_meta(dest, &record.id, ordinal));
            stagings.push(staging.clone());
            staging
        });

        let task = Arc::new(Task::new(
            transfer_task_key(&record.id, &group.sub_job_ids),
            record.id.clone(),
            group.sub_job_ids.clone(),
            TaskWork::DataTransfer {
                source: Arc::new(group.source.clone()),
                dest: Arc::new(group.dest.clone()),
                staging,
                verify: flow.verification,
            },
        ));
        transfer_indices.push(dag.add_task(task));
    }

    for &transfer in &transfer_indices {
        dag.add_edge(setup_index, transfer);
    }

    if flow.uses_staging {
        let cleanup = Arc::new(Task::new(
            format!("{}.cleanup", record.id),
            record.id.clone(),
            Vec::new(),
            TaskWork::Cleanup { staging: stagings },
        ));
        let cleanup_index = dag.add_task(cleanup);
        for &transfer in &transfer_indices {
            dag.add_edge(transfer, cleanup_index);
        }
    }

    info!(
        job_id = %record.id,
        vertices = dag.len(),
        groups = groups.len(),
        staging = flow.uses_staging,
        "task DAG generated"
    );

    Ok(dag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::record::generate_job_id;
    use crate::job::spec::JobSpec;
    use crate::metadata::model::{ColumnMeta, PartitionMeta, SystemKind, partition_identifier};
    use crate::task::base::TaskKind;
    use crate::test_utils::meta::StaticMetaSource;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn partitioned_table(sizes: &[Option<u64>]) -> TableMeta {
        let mut table = TableMeta::new("src_db", "events");
        table.partition_columns = vec![ColumnMeta::new("ds", "string")];
        table.partitions = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let mut partition = PartitionMeta::new(vec![format!("2024-{i:02}")]);
                partition.size_bytes = *size;
                partition
            })
            .collect();
        table
    }

    fn sub_jobs_for(table: &TableMeta, parent: &JobId) -> Vec<JobRecord> {
        let spec = JobSpec::table(
            SystemKind::Hive,
            SystemKind::Warehouse,
            "src_db",
            "events",
            "dst_db",
            "events",
        );
        table
            .partitions
            .iter()
            .map(|partition| {
                let id = generate_job_id(true);
                let identifier = partition_identifier(&table.name, &partition.values);
                JobRecord::new(
                    id.clone(),
                    Some(parent.clone()),
                    spec.for_partition(id, &identifier, None),
                    3,
                    false,
                )
            })
            .collect()
    }

    fn limits() -> GroupingLimits {
        GroupingLimits {
            max_partitions_per_group: 10,
            max_group_bytes: 8 * GIB,
        }
    }

    #[test]
    fn transfer_keys_are_content_addressed() {
        let a = transfer_task_key("job1", &["S_b".to_string(), "S_a".to_string()]);
        let b = transfer_task_key("job1", &["S_a".to_string(), "S_b".to_string()]);
        let c = transfer_task_key("job1", &["S_a".to_string()]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(transfer_task_key("job1", &[]), "job1.transfer");
    }

    #[tokio::test]
    async fn non_partitioned_table_gets_one_whole_table_group() {
        let source = TableMeta::new("src_db", "events");
        let dest = TableMeta::new("dst_db", "events");
        let meta = StaticMetaSource::new().with_table(source.clone());

        let groups = partition_groups(&meta, &source, &dest, &[], &limits())
            .await
            .unwrap();

        assert_eq!(groups.len(), 1);
        assert!(groups[0].sub_job_ids.is_empty());
    }

    #[tokio::test]
    async fn groups_cover_pending_sub_jobs_exactly() {
        let source = partitioned_table(&[
            Some(5 * GIB),
            Some(3 * GIB),
            Some(3 * GIB),
            Some(GIB),
        ]);
        let dest = source.with_partitions(source.partitions.clone());
        let meta = StaticMetaSource::new().with_table(source.clone());
        let parent = "job1".to_string();
        let sub_jobs = sub_jobs_for(&source, &parent);

        let groups = partition_groups(&meta, &source, &dest, &sub_jobs, &limits())
            .await
            .unwrap();

        assert_eq!(groups.len(), 2);
        let mut covered: Vec<JobId> = groups
            .iter()
            .flat_map(|group| group.sub_job_ids.clone())
            .collect();
        covered.sort();
        let mut expected: Vec<JobId> = sub_jobs.iter().map(|j| j.id.clone()).collect();
        expected.sort();
        assert_eq!(covered, expected);
    }

    #[tokio::test]
    async fn dag_shape_without_staging() {
        let source = partitioned_table(&[Some(5 * GIB), Some(3 * GIB), Some(3 * GIB), Some(GIB)]);
        let dest = source.clone();
        let meta = StaticMetaSource::new().with_table(source.clone());
        let spec = JobSpec::table(
            SystemKind::Hive,
            SystemKind::Warehouse,
            "src_db",
            "events",
            "dst_db",
            "events",
        );
        let record = JobRecord::new("job1".to_string(), None, spec, 3, true);
        let sub_jobs = sub_jobs_for(&source, &record.id);

        let flow = FlowSpec {
            uses_staging: false,
            verification: true,
        };
        let dag = build_table_dag(&record, flow, &meta, &source, &dest, &sub_jobs, &limits())
            .await
            .unwrap();

        // One setup plus two transfer groups, no cleanup.
        assert_eq!(dag.len(), 3);
        let kinds: Vec<TaskKind> = dag.tasks().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds.iter().filter(|k| **k == TaskKind::Setup).count(), 1);
        assert_eq!(
            kinds.iter().filter(|k| **k == TaskKind::DataTransfer).count(),
            2
        );

        // Only the setup vertex is initially executable.
        let ready = dag.executable_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].kind(), TaskKind::Setup);
    }

    #[tokio::test]
    async fn staging_flow_appends_cleanup_sink() {
        let source = TableMeta::new("src_db", "events");
        let dest = TableMeta::new("dst_db", "events");
        let meta = StaticMetaSource::new().with_table(source.clone());
        let spec = JobSpec::table(
            SystemKind::Warehouse,
            SystemKind::ObjectStore,
            "src_db",
            "events",
            "dst_db",
            "events",
        );
        let record = JobRecord::new("job1".to_string(), None, spec, 3, false);

        let flow = FlowSpec {
            uses_staging: true,
            verification: false,
        };
        let dag = build_table_dag(&record, flow, &meta, &source, &dest, &[], &limits())
            .await
            .unwrap();

        assert_eq!(dag.len(), 3);
        assert!(dag.find("job1.cleanup").is_some());
        assert!(dag.find("job1.transfer").is_some());
    }
}
