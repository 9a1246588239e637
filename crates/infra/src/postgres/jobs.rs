use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use bulkimport_core::{DomainResult, JobId};

use super::{from_db_count, map_sqlx_error, to_db_count};
use crate::jobs::store::{JobStore, JobStoreError};
use crate::jobs::types::{ImportJob, JobStatus};

const COLUMNS: &str =
    "id, filename, file_path, status, total_rows, processed_rows, error_message, created_at, updated_at";

/// Postgres-backed job store.
///
/// Each mutation locks the row (`SELECT ... FOR UPDATE`), applies the
/// transition through [`ImportJob`], and writes the result back in the same
/// transaction, so the state machine rules hold across processes too.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn mutate<F>(&self, operation: &str, id: JobId, apply: F) -> Result<ImportJob, JobStoreError>
    where
        F: FnOnce(&mut ImportJob) -> DomainResult<()> + Send,
    {
        let storage = |e: sqlx::Error| JobStoreError::Storage(map_sqlx_error(operation, e).into_message());

        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM import_jobs WHERE id = $1 FOR UPDATE"))
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(JobStoreError::NotFound(id))?;
        let mut job = row_to_job(&row)?;

        apply(&mut job)?;

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = $2,
                total_rows = $3,
                processed_rows = $4,
                error_message = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.total_rows.map(to_db_count))
        .bind(to_db_count(job.processed_rows))
        .bind(job.error_message.as_deref())
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(job)
    }
}

fn row_to_job(row: &PgRow) -> Result<ImportJob, JobStoreError> {
    let decode = |e: sqlx::Error| JobStoreError::Storage(format!("failed to decode import_jobs row: {e}"));

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let total_rows: Option<i64> = row.try_get("total_rows").map_err(decode)?;
    let processed_rows: i64 = row.try_get("processed_rows").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    Ok(ImportJob {
        id: JobId::from_uuid(id),
        filename: row.try_get("filename").map_err(decode)?,
        file_path: row.try_get("file_path").map_err(decode)?,
        status: JobStatus::parse(&status)?,
        total_rows: total_rows.map(from_db_count),
        processed_rows: from_db_count(processed_rows),
        error_message: row.try_get("error_message").map_err(decode)?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn insert(&self, job: ImportJob) -> Result<ImportJob, JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, filename, file_path, status, total_rows, processed_rows,
                error_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(&job.filename)
        .bind(&job.file_path)
        .bind(job.status.as_str())
        .bind(job.total_rows.map(to_db_count))
        .bind(to_db_count(job.processed_rows))
        .bind(job.error_message.as_deref())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert_job", e) {
            super::SqlFailure::UniqueViolation(_) => JobStoreError::AlreadyExists(job.id),
            super::SqlFailure::Other(msg) => JobStoreError::Storage(msg),
        })?;
        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<ImportJob>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM import_jobs WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| JobStoreError::Storage(map_sqlx_error("get_job", e).into_message()))?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn start(&self, id: JobId) -> Result<ImportJob, JobStoreError> {
        self.mutate("start_job", id, ImportJob::start).await
    }

    async fn set_total_rows(&self, id: JobId, total: u64) -> Result<ImportJob, JobStoreError> {
        self.mutate("set_total_rows", id, move |job| job.set_total_rows(total)).await
    }

    async fn advance(&self, id: JobId, processed: u64) -> Result<ImportJob, JobStoreError> {
        self.mutate("advance_job", id, move |job| job.advance_to(processed)).await
    }

    async fn complete(&self, id: JobId) -> Result<ImportJob, JobStoreError> {
        self.mutate("complete_job", id, ImportJob::complete).await
    }

    async fn fail(&self, id: JobId, message: &str) -> Result<ImportJob, JobStoreError> {
        let message = message.to_string();
        self.mutate("fail_job", id, move |job| job.fail(message)).await
    }
}
