//! Ingest job record store implementation.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use manuals_core::{
    Document, DocumentChunk, DocumentUpsert, Error, IngestJob, JobCounters, JobError,
    JobParams, JobRecordStore, JobStatus, JobType, NewIngestJob, Result,
};

use crate::documents;

const JOB_COLUMNS: &str = "job_id, doc_id, job_type, status, params, counters, error, \
     dip_success, created_at, started_at, updated_at, completed_at";

/// PostgreSQL implementation of JobRecordStore.
///
/// Status changes lock the job row (`SELECT ... FOR UPDATE`) so concurrent
/// writers cannot interleave a check and an update.
#[derive(Clone)]
pub struct PgJobRecordStore {
    pool: Pool<Postgres>,
}

impl PgJobRecordStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: &PgRow) -> Result<IngestJob> {
        let job_type: String = row.try_get("job_type")?;
        let status: String = row.try_get("status")?;
        let params: Json<JobParams> = row.try_get("params")?;
        let counters: Json<JobCounters> = row.try_get("counters")?;
        let error: Option<Json<JobError>> = row.try_get("error")?;

        Ok(IngestJob {
            job_id: row.try_get("job_id")?,
            doc_id: row.try_get("doc_id")?,
            job_type: JobType::from_str(&job_type).map_err(Error::Internal)?,
            status: JobStatus::from_str(&status).map_err(Error::Internal)?,
            params: params.0,
            counters: counters.0,
            error: error.map(|e| e.0),
            dip_success: row.try_get("dip_success")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// `error` must accompany `failed` and nothing else.
pub(crate) fn check_error_pairing(status: JobStatus, error: Option<&JobError>) -> Result<()> {
    match (status == JobStatus::Failed, error.is_some()) {
        (true, false) => Err(Error::InvalidInput(
            "A failed status requires an error record".to_string(),
        )),
        (false, true) => Err(Error::InvalidInput(format!(
            "An error record is only allowed with status failed, got {}",
            status
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl JobRecordStore for PgJobRecordStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn create_job(&self, job: NewIngestJob) -> Result<IngestJob> {
        let row = sqlx::query(&format!(
            "INSERT INTO ingest_jobs (job_id, doc_id, job_type, status, params, counters)
             VALUES ($1, $2, $3, 'queued', $4, $5)
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(Uuid::now_v7())
        .bind(&job.doc_id)
        .bind(job.job_type.to_string())
        .bind(Json(&job.params))
        .bind(Json(JobCounters::default()))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_job_row(&row)
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<JobError>,
    ) -> Result<()> {
        check_error_pairing(status, error.as_ref())?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let current: String =
            sqlx::query_scalar("SELECT status FROM ingest_jobs WHERE job_id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?
                .ok_or(Error::JobNotFound(job_id))?;
        let current = JobStatus::from_str(&current).map_err(Error::Internal)?;

        current.check_transition(status)?;
        if current == status {
            debug!(subsystem = "db", job_id = %job_id, status = %status, "Status unchanged");
            return Ok(());
        }

        sqlx::query(
            "UPDATE ingest_jobs SET
                 status = $2,
                 error = $3,
                 updated_at = now(),
                 started_at = CASE WHEN $2 = 'parsing' AND started_at IS NULL
                                   THEN now() ELSE started_at END,
                 completed_at = CASE WHEN $2 IN ('completed', 'failed')
                                     THEN now() ELSE completed_at END
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(error.map(Json))
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let existing: Json<JobCounters> =
            sqlx::query_scalar("SELECT counters FROM ingest_jobs WHERE job_id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?
                .ok_or(Error::JobNotFound(job_id))?;

        let mut merged = existing.0;
        merged.merge(counters);

        sqlx::query("UPDATE ingest_jobs SET counters = $2, updated_at = now() WHERE job_id = $1")
            .bind(job_id)
            .bind(Json(&merged))
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn update_job_dip_success(&self, job_id: Uuid, success: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ingest_jobs SET dip_success = $2, updated_at = now() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(success)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<IngestJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ingest_jobs WHERE job_id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>> {
        documents::fetch_document(&self.pool, doc_id).await
    }

    async fn create_or_update_document(&self, doc: DocumentUpsert) -> Result<Document> {
        documents::upsert_document(&self.pool, &doc).await
    }

    async fn update_document_storage_path(&self, doc_id: &str, path: &str) -> Result<()> {
        documents::set_storage_path(&self.pool, doc_id, path).await
    }

    async fn get_chunks_by_doc_id(&self, doc_id: &str) -> Result<Vec<DocumentChunk>> {
        documents::fetch_chunks(&self.pool, doc_id).await
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<IngestJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ingest_jobs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            JOB_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_job_row).collect()
    }

    async fn list_documents(&self, limit: i64, offset: i64) -> Result<Vec<Document>> {
        documents::list_documents(&self.pool, limit, offset).await
    }
}
