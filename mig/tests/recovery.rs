#![cfg(feature = "test-utils")]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use mig::job::{JobSpec, JobStatus};
use mig::metadata::model::{ColumnMeta, PartitionMeta, SystemKind, TableMeta};
use mig::orchestrator::Orchestrator;
use mig::store::JobStore;
use mig::test_utils::{NotifyingJobStore, ScriptedBackend, StaticMetaSource, fast_config};
use mig_telemetry::tracing::init_test_tracing;
use tokio::time::{sleep, timeout};

const GIB: u64 = 1024 * 1024 * 1024;

type TestOrchestrator = Orchestrator<NotifyingJobStore, StaticMetaSource, ScriptedBackend>;

fn plain_table(catalog: &str, name: &str) -> TableMeta {
    let mut table = TableMeta::new(catalog, name);
    table.columns = vec![ColumnMeta::new("id", "bigint")];
    table.last_modified = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    table
}

fn partition(day: &str, size: u64) -> PartitionMeta {
    PartitionMeta::new(vec![day.to_string()])
        .with_size(size)
        .with_last_modified(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
}

fn partitioned_table(catalog: &str, name: &str, days: &[&str]) -> TableMeta {
    let mut table = plain_table(catalog, name);
    table.partition_columns = vec![ColumnMeta::new("ds", "string")];
    table.partitions = days.iter().map(|day| partition(day, GIB)).collect();
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
async fn restart_resumes_at_data_transfer_without_recreating_the_object() {
    init_test_tracing();

    let meta = StaticMetaSource::new().with_table(plain_table("src_db", "events"));
    let store = NotifyingJobStore::new();

    // First run: the copy hangs forever and the process "crashes" mid-transfer.
    let first_backend = ScriptedBackend::new();
    first_backend.block_next("copy_data", 1);
    let copy_entered = first_backend.notify_on("copy_data");

    let mut orchestrator =
        create_orchestrator(store.clone(), meta.clone(), first_backend.clone());
    let job_id = orchestrator.submit(hive_spec("events")).await.unwrap();

    orchestrator.start().await.unwrap();
    copy_entered.notified().await;
    orchestrator.shutdown_and_wait().await.unwrap();

    // The first run got as far as the data transfer.
    assert_eq!(first_backend.call_count("create_table"), 1);
    assert_eq!(first_backend.call_count("copy_data"), 1);
    let interrupted = store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(interrupted.status, JobStatus::Running);

    // Second run over the same persisted state, with a healthy backend.
    let second_store = NotifyingJobStore::from_store(store.inner_store());
    let second_backend = ScriptedBackend::new();
    let mut orchestrator =
        create_orchestrator(second_store.clone(), meta, second_backend.clone());
    let succeeded = second_store.notify_on_job_status(&job_id, JobStatus::Succeeded);

    orchestrator.start().await.unwrap();
    succeeded.notified().await;

    // The setup phase's `done` sub-status is honored: the destination object is
    // not re-created and the transfer resumes at its interrupted step.
    assert_eq!(second_backend.call_count("create_table"), 0);
    assert_eq!(second_backend.call_count("truncate_table"), 0);
    assert_eq!(second_backend.call_count("copy_data"), 1);
    assert_eq!(second_backend.call_count("verify_data"), 1);

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_detects_new_partition_and_replans() {
    init_test_tracing();

    let meta =
        StaticMetaSource::new().with_table(partitioned_table("src_db", "events", &["d1", "d2"]));
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();

    let mut orchestrator = create_orchestrator(store.clone(), meta.clone(), backend.clone());
    let job_id = orchestrator.submit(hive_spec("events")).await.unwrap();
    let succeeded = store.notify_on_job_status(&job_id, JobStatus::Succeeded);

    orchestrator.start().await.unwrap();
    succeeded.notified().await;
    assert_eq!(backend.call_count("copy_data"), 1);

    // Upstream drift: a third partition appears and the table moves forward.
    let mut table = partitioned_table("src_db", "events", &["d1", "d2", "d3"]);
    table.last_modified = Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
    meta.set_table(table);

    let reset = orchestrator.reset_job(&job_id, false).await.unwrap();
    assert!(reset);

    // The discovered partition got its own sub-job.
    let sub_jobs = store.list_sub_jobs(&job_id).await.unwrap();
    assert_eq!(sub_jobs.len(), 3);

    wait_for_status(&orchestrator, &job_id, JobStatus::Succeeded).await;

    // Only the pending (new) partition was transferred on the second pass.
    assert_eq!(backend.call_count("copy_data"), 2);
    let sub_jobs = store.list_sub_jobs(&job_id).await.unwrap();
    assert!(
        sub_jobs
            .iter()
            .all(|record| record.status == JobStatus::Succeeded)
    );

    orchestrator.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_reset_prunes_sub_jobs_of_vanished_partitions() {
    init_test_tracing();

    let meta =
        StaticMetaSource::new().with_table(partitioned_table("src_db", "events", &["d1", "d2"]));
    let store = NotifyingJobStore::new();
    let backend = ScriptedBackend::new();

    let mut orchestrator = create_orchestrator(store.clone(), meta.clone(), backend.clone());
    let job_id = orchestrator.submit(hive_spec("events")).await.unwrap();
    let succeeded = store.notify_on_job_status(&job_id, JobStatus::Succeeded);

    orchestrator.start().await.unwrap();
    succeeded.notified().await;

    // One partition disappears at the source.
    meta.set_table(partitioned_table("src_db", "events", &["d1"]));

    let reset = orchestrator.reset_job(&job_id, true).await.unwrap();
    assert!(reset);

    let sub_jobs = store.list_sub_jobs(&job_id).await.unwrap();
    assert_eq!(sub_jobs.len(), 1);

    wait_for_status(&orchestrator, &job_id, JobStatus::Succeeded).await;

    orchestrator.shutdown_and_wait().await.unwrap();
}
