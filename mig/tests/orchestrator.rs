#![cfg(feature = "test-utils")]

use std::time::Duration;

use mig::config::GroupingLimits;
use mig::error::ErrorKind;
use mig::job::{JobRecord, JobSpec, JobStatus};
use mig::metadata::model::{ColumnMeta, ObjectType, PartitionMeta, SystemKind, TableMeta};
use mig::orchestrator::Orchestrator;
use mig::store::JobStore;
use mig::task::TaskProgress;
use mig::test_utils::{
    BackendCall, NotifyingJobStore, ScriptedBackend, StaticMetaSource, fast_config,
};
use mig_telemetry::tracing::init_test_tracing;
use tokio::time::{sleep, timeout};

const GIB: u64 = 1024 * 1024 * 1024;

type TestOrchestrator = Orchestrator<NotifyingJobStore, StaticMetaSource, ScriptedBackend>;

fn plain_table(catalog: &str, name: &str) -> TableMeta {
    let mut table = TableMeta::new(catalog, name);
    table.columns = vec![
        ColumnMeta::new("id", "bigint"),
        ColumnMeta::new("payload", "string"),
    ];
    table
}

fn partitioned_table(catalog: &str, name: &str, sizes: &[Option<u64>]) -> TableMeta {
    let mut table = plain_table(catalog, name);
    table.partition_columns = vec![ColumnMeta::new("ds", "string")];
    table.partitions = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            let mut partition = PartitionMeta::new(vec![format!("2024-{:02}", i + 1)]);
            partition.size_bytes = *size;
            partition
        })
        .collect();
    table
}

fn hive_spec(table: &str) -> JobSpec {
    JobSpec::table(
        SystemKind::Hive,
        SystemKind::Warehouse,
        "src_db",
        table,
        "dst_db",
        table,
    )
}

fn create_orchestrator(
    store: NotifyingJobStore,
    meta: StaticMetaSource,
    backend: ScriptedBackend,
) -> TestOrchestrator {
    Orchestrator::new(fast_config(), store, meta, backend).unwrap()
}

/// Polls the job record until the predicate holds, panicking after 30 seconds.
async fn wait_for_record<F>(orchestrator: &TestOrchestrator, job_id: &str, predicate: F)
where
    F: Fn(&JobRecord) -> bool,
{
    timeout(Duration::from_secs(30), async {
        loop {
            let record = orchestrator.job_record(job_id).await.unwrap();
            if predicate(&record) {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for job record state");
}

/// Polls the aggregation-corrected status until it matches.
async fn wait_for_status(orchestrator: &TestOrchestrator, job_id: &str, status: JobStatus) {
    timeout(Duration::from_secs(30), async {
        loop {
            if orchestrator.job_status(job_id).await.unwrap() == status {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for job status");
}

#[tokio::test(flavor = "multi_thread")]
async fn small_table_without_partitions_succeeds() {
    init_test_tracing();

    let meta = StaticMetaSource::new().with_table(plain_table("src_db", "events"));
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());
    let job_id = orchestrator.submit(hive_spec("events")).await.unwrap();
    let succeeded = store.notify_on_job_status(&job_id, JobStatus::Succeeded);

    orchestrator.start().await.unwrap();
    succeeded.notified().await;

    assert_eq!(
        orchestrator.job_status(&job_id).await.unwrap(),
        JobStatus::Succeeded
    );

    // Setup created the object once, the transfer truncated and copied, the
    // flow's verification ran, and nothing needed cleanup.
    assert_eq!(backend.call_count("create_table"), 1);
    assert_eq!(backend.call_count("truncate_table"), 1);
    assert_eq!(backend.call_count("copy_data"), 1);
    assert_eq!(backend.call_count("verify_data"), 1);
    assert_eq!(backend.call_count("drop_table"), 0);
    assert!(
        backend
            .calls()
            .contains(&BackendCall::CreateTable("dst_db.events".to_string()))
    );

    // The observability surface exposes both vertices with their timings.
    let tasks = orchestrator.job_tasks(&job_id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|view| {
        view.progress == TaskProgress::Succeeded
            && view.started_at.is_some()
            && view.ended_at.is_some()
    }));

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_flow_is_rejected_at_submission() {
    init_test_tracing();

    let meta = StaticMetaSource::new().with_table(plain_table("src_db", "events"));
    let orchestrator = create_orchestrator(NotifyingJobStore::new(), meta, ScriptedBackend::new());

    let mut spec = hive_spec("events");
    spec.dest_system = SystemKind::ObjectStore;
    let err = orchestrator.submit(spec).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFlow);
}

#[tokio::test(flavor = "multi_thread")]
async fn adaptive_grouping_batches_partitions_into_two_transfers() {
    init_test_tracing();

    // Sizes [5, 3, 3, 1] GiB with an 8 GiB threshold pack into two groups.
    let table = partitioned_table(
        "src_db",
        "events",
        &[Some(5 * GIB), Some(3 * GIB), Some(3 * GIB), Some(GIB)],
    );
    let meta = StaticMetaSource::new().with_table(table);
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());

    let mut spec = hive_spec("events");
    spec.grouping = Some(GroupingLimits {
        max_partitions_per_group: 10,
        max_group_bytes: 8 * GIB,
    });
    let job_id = orchestrator.submit(spec).await.unwrap();
    let succeeded = store.notify_on_job_status(&job_id, JobStatus::Succeeded);

    orchestrator.start().await.unwrap();
    succeeded.notified().await;

    assert_eq!(backend.call_count("copy_data"), 2);

    // Every partition sub-job finished with the job.
    let sub_jobs = store.list_sub_jobs(&job_id).await.unwrap();
    assert_eq!(sub_jobs.len(), 4);
    assert!(
        sub_jobs
            .iter()
            .all(|record| record.status == JobStatus::Succeeded)
    );

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn static_grouping_is_used_when_sizes_are_unknown() {
    init_test_tracing();

    let table = partitioned_table("src_db", "events", &[None, None, None, None, None]);
    let meta = StaticMetaSource::new().with_table(table);
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());

    let mut spec = hive_spec("events");
    spec.grouping = Some(GroupingLimits {
        max_partitions_per_group: 2,
        max_group_bytes: 8 * GIB,
    });
    let job_id = orchestrator.submit(spec).await.unwrap();
    let succeeded = store.notify_on_job_status(&job_id, JobStatus::Succeeded);

    orchestrator.start().await.unwrap();
    succeeded.notified().await;

    // ceil(5 / 2) fixed-size chunks.
    assert_eq!(backend.call_count("copy_data"), 3);

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_failure_fails_job_and_backing_sub_jobs() {
    init_test_tracing();

    let table = partitioned_table(
        "src_db",
        "events",
        &[Some(5 * GIB), Some(3 * GIB), Some(3 * GIB), Some(GIB)],
    );
    let meta = StaticMetaSource::new().with_table(table);
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();
    backend.fail_next("copy_data", 1);

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());

    let mut spec = hive_spec("events");
    spec.max_attempts = Some(1);
    spec.grouping = Some(GroupingLimits {
        max_partitions_per_group: 10,
        max_group_bytes: 8 * GIB,
    });
    let job_id = orchestrator.submit(spec).await.unwrap();
    let failed = store.notify_on_job_status(&job_id, JobStatus::Failed);

    orchestrator.start().await.unwrap();
    failed.notified().await;

    let info = orchestrator.job_info(&job_id).await.unwrap();
    assert!(info.contains("data transfer failed"), "info: {info}");
    assert!(info.contains(".transfer"), "info: {info}");

    // One group failed, the other finished; siblings are not rolled back.
    let sub_jobs = store.list_sub_jobs(&job_id).await.unwrap();
    let failed_subs = sub_jobs
        .iter()
        .filter(|record| record.status == JobStatus::Failed)
        .count();
    let succeeded_subs = sub_jobs
        .iter()
        .filter(|record| record.status == JobStatus::Succeeded)
        .count();
    assert!(failed_subs > 0);
    assert_eq!(failed_subs + succeeded_subs, sub_jobs.len());

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_exhaustion_fails_after_second_attempt() {
    init_test_tracing();

    let meta = StaticMetaSource::new().with_table(plain_table("src_db", "events"));
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();
    backend.fail_next("copy_data", 100);

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());

    let mut spec = hive_spec("events");
    spec.max_attempts = Some(2);
    let job_id = orchestrator.submit(spec).await.unwrap();

    orchestrator.start().await.unwrap();

    // Two consecutive transient failures: terminally failed only after the
    // second attempt burned out.
    wait_for_record(&orchestrator, &job_id, |record| {
        record.status == JobStatus::Failed && record.attempts == 2
    })
    .await;

    assert_eq!(backend.call_count("copy_data"), 2);
    // The destination object is created once; the second attempt resumes past
    // the completed setup checkpoint.
    assert_eq!(backend.call_count("create_table"), 1);

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_cancels_in_flight_work() {
    init_test_tracing();

    let meta = StaticMetaSource::new().with_table(plain_table("src_db", "events"));
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();
    backend.block_next("copy_data", 1);
    let copy_entered = backend.notify_on("copy_data");

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());
    let job_id = orchestrator.submit(hive_spec("events")).await.unwrap();

    orchestrator.start().await.unwrap();
    copy_entered.notified().await;

    orchestrator.stop_job(&job_id).await.unwrap();

    assert_eq!(
        orchestrator.job_status(&job_id).await.unwrap(),
        JobStatus::Canceled
    );

    // Cancellation is not a failure: the scheduler never retries it.
    sleep(Duration::from_millis(150)).await;
    assert_eq!(
        orchestrator.job_status(&job_id).await.unwrap(),
        JobStatus::Canceled
    );
    assert_eq!(backend.call_count("copy_data"), 1);

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn staging_flow_runs_cleanup_even_after_transfer_failure() {
    init_test_tracing();

    let table = partitioned_table("src_db", "events", &[Some(5 * GIB), Some(5 * GIB)]);
    let meta = StaticMetaSource::new().with_table(table);
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();
    backend.fail_next("copy_data", 1);

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());

    let mut spec = JobSpec::table(
        SystemKind::Warehouse,
        SystemKind::ObjectStore,
        "src_db",
        "events",
        "dst_db",
        "events",
    );
    spec.max_attempts = Some(1);
    spec.grouping = Some(GroupingLimits {
        max_partitions_per_group: 10,
        max_group_bytes: 8 * GIB,
    });
    let job_id = orchestrator.submit(spec).await.unwrap();
    let failed = store.notify_on_job_status(&job_id, JobStatus::Failed);

    orchestrator.start().await.unwrap();
    failed.notified().await;

    // Best-effort cleanup still drops both groups' staging objects.
    timeout(Duration::from_secs(10), async {
        while backend.call_count("drop_table") < 2 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("cleanup never dropped the staging objects");

    // The cleanup outcome does not overwrite the failure.
    assert_eq!(
        orchestrator.job_status(&job_id).await.unwrap(),
        JobStatus::Failed
    );

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn catalog_job_migrates_every_table() {
    init_test_tracing();

    let meta = StaticMetaSource::new()
        .with_table(plain_table("src_db", "events"))
        .with_table(plain_table("src_db", "users"));
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();

    let mut orchestrator = create_orchestrator(store.clone(), meta, backend.clone());

    let mut spec = hive_spec("src_db");
    spec.object_type = ObjectType::Catalog;
    spec.dest_object = "dst_db".to_string();
    let root_id = orchestrator.submit(spec).await.unwrap();

    let sub_jobs = store.list_sub_jobs(&root_id).await.unwrap();
    assert_eq!(sub_jobs.len(), 2);

    orchestrator.start().await.unwrap();
    wait_for_status(&orchestrator, &root_id, JobStatus::Succeeded).await;

    assert_eq!(backend.call_count("create_table"), 2);
    assert_eq!(backend.call_count("copy_data"), 2);

    orchestrator.shutdown_and_wait().await.unwrap();
}
