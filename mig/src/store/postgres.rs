use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::info;

use crate::error::{ErrorKind, MigResult};
use crate::job::record::JobRecord;
use crate::job::status::JobStatus;
use crate::metadata::model::ObjectType;
use crate::mig_error;
use crate::store::base::JobStore;
use crate::task::phase::{StepStatus, TaskCheckpoint, TaskPhase};

/// Maximum connections held against the state database.
const MAX_POOL_CONNECTIONS: u32 = 5;

const CREATE_JOBS_TABLE: &str = r#"
create table if not exists migration_jobs (
    seq bigint generated always as identity,
    id text primary key,
    parent_id text,
    object_type text not null,
    status text not null,
    priority integer not null,
    attempts bigint not null,
    max_attempts bigint not null,
    spec text not null,
    info text not null,
    has_sub_jobs boolean not null,
    created_at timestamptz not null,
    started_at timestamptz,
    ended_at timestamptz,
    updated_at timestamptz not null
)
"#;

const CREATE_CHECKPOINTS_TABLE: &str = r#"
create table if not exists migration_task_checkpoints (
    job_id text not null,
    task_key text not null,
    phase text not null,
    step text not null,
    status text not null,
    updated_at timestamptz not null,
    primary key (job_id, task_key)
)
"#;

/// Postgres-backed implementation of [`JobStore`].
///
/// One row per job in `migration_jobs` (sub-jobs linked through `parent_id`,
/// the partition identifier living inside the serialized spec), and one
/// sub-status row per task in `migration_task_checkpoints`.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Connects to the state database and applies the schema migration.
    pub async fn connect(url: &str) -> MigResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Creates the backing tables when missing.
    async fn migrate(&self) -> MigResult<()> {
        sqlx::query(CREATE_JOBS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_CHECKPOINTS_TABLE)
            .execute(&self.pool)
            .await?;

        info!("job store schema is up to date");
        Ok(())
    }

    fn record_from_row(row: &PgRow) -> MigResult<JobRecord> {
        let object_type: String = row.try_get("object_type")?;
        let status: String = row.try_get("status")?;
        let spec: String = row.try_get("spec")?;
        let attempts: i64 = row.try_get("attempts")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;

        Ok(JobRecord {
            id: row.try_get("id")?,
            parent_id: row.try_get("parent_id")?,
            object_type: ObjectType::try_from(object_type.as_str())?,
            status: JobStatus::try_from(status.as_str())?,
            priority: row.try_get("priority")?,
            attempts: to_u32(attempts)?,
            max_attempts: to_u32(max_attempts)?,
            spec: serde_json::from_str(&spec)?,
            info: row.try_get("info")?,
            has_sub_jobs: row.try_get("has_sub_jobs")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn to_u32(value: i64) -> MigResult<u32> {
    u32::try_from(value).map_err(|_| {
        mig_error!(
            ErrorKind::DeserializationError,
            "Persisted counter out of range",
            value.to_string()
        )
    })
}

impl JobStore for PostgresJobStore {
    async fn load_jobs(&self) -> MigResult<Vec<JobRecord>> {
        let rows = sqlx::query("select * from migration_jobs order by seq")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn upsert_job(&self, record: &JobRecord) -> MigResult<()> {
        let spec = serde_json::to_string(&record.spec)?;

        sqlx::query(
            r#"
            insert into migration_jobs (
                id, parent_id, object_type, status, priority, attempts,
                max_attempts, spec, info, has_sub_jobs, created_at, started_at,
                ended_at, updated_at
            )
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            on conflict (id) do update set
                status = excluded.status,
                priority = excluded.priority,
                attempts = excluded.attempts,
                max_attempts = excluded.max_attempts,
                spec = excluded.spec,
                info = excluded.info,
                has_sub_jobs = excluded.has_sub_jobs,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.parent_id)
        .bind(record.object_type.as_static_str())
        .bind(record.status.as_static_str())
        .bind(record.priority)
        .bind(i64::from(record.attempts))
        .bind(i64::from(record.max_attempts))
        .bind(spec)
        .bind(&record.info)
        .bind(record.has_sub_jobs)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: &str) -> MigResult<Option<JobRecord>> {
        let row = sqlx::query("select * from migration_jobs where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_sub_jobs(&self, parent_id: &str) -> MigResult<Vec<JobRecord>> {
        let rows = sqlx::query("select * from migration_jobs where parent_id = $1 order by seq")
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn remove_job(&self, id: &str) -> MigResult<()> {
        sqlx::query("delete from migration_task_checkpoints where job_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("delete from migration_jobs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
    ) -> MigResult<Option<TaskCheckpoint>> {
        let row = sqlx::query(
            "select phase, step, status from migration_task_checkpoints \
             where job_id = $1 and task_key = $2",
        )
        .bind(job_id)
        .bind(task_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let phase: String = row.try_get("phase")?;
        let step: String = row.try_get("step")?;
        let status: String = row.try_get("status")?;

        Ok(Some(TaskCheckpoint {
            phase: TaskPhase::try_from(phase.as_str())?,
            step,
            status: StepStatus::try_from(status.as_str())?,
        }))
    }

    async fn put_task_checkpoint(
        &self,
        job_id: &str,
        task_key: &str,
        checkpoint: &TaskCheckpoint,
    ) -> MigResult<()> {
        sqlx::query(
            r#"
            insert into migration_task_checkpoints (
                job_id, task_key, phase, step, status, updated_at
            )
            values ($1, $2, $3, $4, $5, now())
            on conflict (job_id, task_key) do update set
                phase = excluded.phase,
                step = excluded.step,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(job_id)
        .bind(task_key)
        .bind(checkpoint.phase.as_static_str())
        .bind(&checkpoint.step)
        .bind(checkpoint.status.as_static_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_task_checkpoints(&self, job_id: &str) -> MigResult<()> {
        sqlx::query("delete from migration_task_checkpoints where job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
