use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use crate::application::ports::{
    most_recent_error, DocumentProgress, JobLedger, LedgerError, StageProgress,
};
use crate::domain::{
    ContentType, Document, DocumentId, DocumentStatus, JobId, JobStatus, ProcessingJob,
    RetryPolicy, Stage, StageFailure, StageOutputs, StoragePath, WorkerId,
};
use crate::infrastructure::observability::sanitize_error;

const JOB_COLUMNS: &str = "id, document_id, stage, status, attempt_count, last_error, \
     next_attempt_at, lease_owner, lease_expires_at, pending_children, parent_job_id, \
     chunk_id, payload, outputs, created_at, updated_at";

/// PostgreSQL Ledger adapter. Claims are serialized with
/// `FOR UPDATE SKIP LOCKED`; completion, fan-out and fan-in all run inside a
/// single transaction so concurrent workers only ever observe committed
/// transitions.
pub struct PgLedger {
    pool: PgPool,
    policy: RetryPolicy,
    lease_ttl: Duration,
}

impl PgLedger {
    pub fn new(pool: PgPool, policy: RetryPolicy, lease_ttl: Duration) -> Self {
        Self {
            pool,
            policy,
            lease_ttl,
        }
    }

    fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    fn map_job(row: &PgRow) -> Result<ProcessingJob, LedgerError> {
        let stage: String = row.try_get("stage").map_err(storage_err)?;
        let status: String = row.try_get("status").map_err(storage_err)?;

        let payload: Option<serde_json::Value> = row.try_get("payload").map_err(storage_err)?;
        let outputs: Option<serde_json::Value> = row.try_get("outputs").map_err(storage_err)?;

        Ok(ProcessingJob {
            id: JobId::from_uuid(row.try_get("id").map_err(storage_err)?),
            document_id: DocumentId::from_uuid(row.try_get("document_id").map_err(storage_err)?),
            stage: Stage::from_str(&stage).map_err(LedgerError::Storage)?,
            status: JobStatus::from_str(&status).map_err(LedgerError::Storage)?,
            attempt_count: row.try_get::<i32, _>("attempt_count").map_err(storage_err)? as u32,
            last_error: row.try_get("last_error").map_err(storage_err)?,
            next_attempt_at: row.try_get("next_attempt_at").map_err(storage_err)?,
            lease_owner: row.try_get("lease_owner").map_err(storage_err)?,
            lease_expires_at: row.try_get("lease_expires_at").map_err(storage_err)?,
            pending_children: row
                .try_get::<Option<i32>, _>("pending_children")
                .map_err(storage_err)?
                .map(|n| n as u32),
            parent_job_id: row
                .try_get::<Option<uuid::Uuid>, _>("parent_job_id")
                .map_err(storage_err)?
                .map(JobId::from_uuid),
            chunk_id: row
                .try_get::<Option<uuid::Uuid>, _>("chunk_id")
                .map_err(storage_err)?
                .map(crate::domain::ChunkId::from_uuid),
            payload: payload.map(decode_outputs).transpose()?,
            outputs: outputs.map(decode_outputs).transpose()?,
            created_at: row.try_get("created_at").map_err(storage_err)?,
            updated_at: row.try_get("updated_at").map_err(storage_err)?,
        })
    }

    fn map_document(row: &PgRow) -> Result<Document, LedgerError> {
        let content_type: String = row.try_get("content_type").map_err(storage_err)?;
        let locator: String = row.try_get("source_locator").map_err(storage_err)?;

        Ok(Document {
            id: DocumentId::from_uuid(row.try_get("id").map_err(storage_err)?),
            source_locator: StoragePath::from_raw(locator),
            owner: row.try_get("owner").map_err(storage_err)?,
            content_type: ContentType::from_str(&content_type).map_err(LedgerError::Storage)?,
            content_hash: row
                .try_get::<String, _>("content_hash")
                .map_err(storage_err)?
                .trim()
                .to_string(),
            created_at: row.try_get("created_at").map_err(storage_err)?,
            updated_at: row.try_get("updated_at").map_err(storage_err)?,
        })
    }

    async fn insert_job(
        tx: &mut Transaction<'_, Postgres>,
        job: &ProcessingJob,
    ) -> Result<(), LedgerError> {
        let payload = job.payload.as_ref().map(encode_outputs).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO processing_jobs
                (id, document_id, stage, status, attempt_count, parent_job_id, chunk_id,
                 payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.document_id.as_uuid())
        .bind(job.stage.as_str())
        .bind(job.status.as_str())
        .bind(job.attempt_count as i32)
        .bind(job.parent_job_id.map(|id| id.as_uuid()))
        .bind(job.chunk_id.map(|id| id.as_uuid()))
        .bind(payload)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Post-SUCCEEDED continuation, inside the caller's transaction.
    async fn advance(
        tx: &mut Transaction<'_, Postgres>,
        job: &ProcessingJob,
        outputs: &StageOutputs,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let cancelled = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT cancelled_at FROM documents WHERE id = $1",
        )
        .bind(job.document_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_err)?
        .flatten();

        if cancelled.is_some() {
            tracing::debug!(job_id = %job.id, "Document cancelled, stopping stage chain");
            return Ok(());
        }

        match (job.stage, outputs) {
            (Stage::Chunk, StageOutputs::Chunked { chunk_ids }) if !chunk_ids.is_empty() => {
                sqlx::query(
                    "UPDATE processing_jobs SET pending_children = $2, updated_at = $3 WHERE id = $1",
                )
                .bind(job.id.as_uuid())
                .bind(chunk_ids.len() as i32)
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(storage_err)?;

                for chunk_id in chunk_ids {
                    let child = ProcessingJob::embed_child(job.document_id, job.id, *chunk_id);
                    Self::insert_job(tx, &child).await?;
                }
            }
            (Stage::Embed, _) => {
                let parent_id = match job.parent_job_id {
                    Some(id) => id,
                    None => return Ok(()),
                };
                let remaining = sqlx::query_scalar::<_, Option<i32>>(
                    r#"
                    UPDATE processing_jobs
                    SET pending_children = pending_children - 1, updated_at = $2
                    WHERE id = $1
                    RETURNING pending_children
                    "#,
                )
                .bind(parent_id.as_uuid())
                .bind(now)
                .fetch_one(&mut **tx)
                .await
                .map_err(storage_err)?
                .unwrap_or(0);

                if remaining == 0 {
                    let store = ProcessingJob::new(job.document_id, Stage::Store, None);
                    Self::insert_job(tx, &store).await?;
                }
            }
            (Stage::Store, _) => {
                sqlx::query(
                    "UPDATE documents SET status = $2, updated_at = $3 WHERE id = $1",
                )
                .bind(job.document_id.as_uuid())
                .bind(DocumentStatus::Completed.as_str())
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(storage_err)?;
            }
            (stage, outputs) => {
                if let Some(next) = stage.next() {
                    let next_job =
                        ProcessingJob::new(job.document_id, next, Some(outputs.clone()));
                    Self::insert_job(tx, &next_job).await?;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobLedger for PgLedger {
    #[instrument(skip(self, document), fields(document_id = %document.id))]
    async fn register_document(&self, document: &Document) -> Result<Vec<JobId>, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE content_hash = $1 AND status = $2 LIMIT 1",
        )
        .bind(&document.content_hash)
        .bind(DocumentStatus::Completed.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        if let Some(existing_id) = existing {
            let job_ids: Vec<uuid::Uuid> = sqlx::query_scalar(
                "SELECT id FROM processing_jobs WHERE document_id = $1 ORDER BY created_at, id",
            )
            .bind(existing_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage_err)?;

            tx.commit().await.map_err(storage_err)?;
            tracing::info!(
                document_id = %existing_id,
                content_hash = %document.content_hash,
                "Identical content already processed, skipping registration"
            );
            return Ok(job_ids.into_iter().map(JobId::from_uuid).collect());
        }

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, source_locator, owner, content_type, content_hash, status,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(document.id.as_uuid())
        .bind(document.source_locator.as_str())
        .bind(&document.owner)
        .bind(document.content_type.as_mime())
        .bind(&document.content_hash)
        .bind(DocumentStatus::InProgress.as_str())
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        let extract = ProcessingJob::new(document.id, Stage::Extract, None);
        let job_id = extract.id;
        Self::insert_job(&mut tx, &extract).await?;

        tx.commit().await.map_err(storage_err)?;
        Ok(vec![job_id])
    }

    #[instrument(skip(self), fields(stage = %stage, worker = %worker_id))]
    async fn claim_next(
        &self,
        stage: Stage,
        worker_id: &WorkerId,
    ) -> Result<Option<ProcessingJob>, LedgerError> {
        let now = Utc::now();
        let sql = format!(
            r#"
            UPDATE processing_jobs AS j
            SET status = 'RUNNING',
                attempt_count = j.attempt_count + 1,
                lease_owner = $2,
                lease_expires_at = $3,
                updated_at = $4
            WHERE j.id = (
                SELECT c.id
                FROM processing_jobs c
                JOIN documents d ON d.id = c.document_id
                WHERE c.stage = $1
                  AND d.cancelled_at IS NULL
                  AND (c.status = 'PENDING'
                       OR (c.status = 'RETRY_SCHEDULED' AND c.next_attempt_at <= $4))
                ORDER BY c.created_at, c.id
                FOR UPDATE OF c SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(stage.as_str())
            .bind(worker_id.as_str())
            .bind(self.lease_deadline(now))
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(Self::map_job).transpose()
    }

    #[instrument(skip(self, outputs), fields(job_id = %job_id))]
    async fn complete(&self, job_id: JobId, outputs: StageOutputs) -> Result<(), LedgerError> {
        let now = Utc::now();
        let encoded = encode_outputs(&outputs)?;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let sql = format!(
            r#"
            UPDATE processing_jobs
            SET status = 'SUCCEEDED', outputs = $2, lease_owner = NULL,
                lease_expires_at = NULL, updated_at = $3
            WHERE id = $1 AND status = 'RUNNING'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .bind(encoded)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;

        let Some(row) = row else {
            return Err(LedgerError::LeaseLost { job_id, at: now });
        };
        let job = Self::map_job(&row)?;

        Self::advance(&mut tx, &job, &outputs, now).await?;
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    #[instrument(skip(self, failure), fields(job_id = %job_id, kind = %failure.kind))]
    async fn fail(&self, job_id: JobId, failure: &StageFailure) -> Result<(), LedgerError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let row = sqlx::query(
            "SELECT status, attempt_count, document_id, stage FROM processing_jobs \
             WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else {
            return Err(LedgerError::JobNotFound(job_id));
        };

        let status: String = row.try_get("status").map_err(storage_err)?;
        if JobStatus::from_str(&status).map_err(LedgerError::Storage)? != JobStatus::Running {
            return Err(LedgerError::LeaseLost { job_id, at: now });
        }

        let attempt_count = row.try_get::<i32, _>("attempt_count").map_err(storage_err)? as u32;
        let document_id: uuid::Uuid = row.try_get("document_id").map_err(storage_err)?;
        let message = sanitize_error(&failure.to_string());

        if failure.is_retryable() && self.policy.attempts_remaining(failure.kind, attempt_count) {
            let delay = self.policy.delay_after(failure, attempt_count);
            let next_attempt_at = now
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(1));

            sqlx::query(
                r#"
                UPDATE processing_jobs
                SET status = 'RETRY_SCHEDULED', last_error = $2, next_attempt_at = $3,
                    lease_owner = NULL, lease_expires_at = NULL, updated_at = $4
                WHERE id = $1
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(&message)
            .bind(next_attempt_at)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

            tracing::warn!(
                attempt = attempt_count,
                delay_ms = delay.as_millis() as u64,
                "Stage failed, retry scheduled"
            );
        } else {
            sqlx::query(
                r#"
                UPDATE processing_jobs
                SET status = 'FAILED', last_error = $2, lease_owner = NULL,
                    lease_expires_at = NULL, updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(&message)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

            sqlx::query(
                "UPDATE documents SET status = $2, updated_at = $3 WHERE id = $1 AND status = $4",
            )
            .bind(document_id)
            .bind(DocumentStatus::Failed.as_str())
            .bind(now)
            .bind(DocumentStatus::InProgress.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

            tracing::error!(attempt = attempt_count, "Stage terminally failed");
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn heartbeat(&self, job_id: JobId, worker_id: &WorkerId) -> Result<(), LedgerError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET lease_expires_at = $3, updated_at = $4
            WHERE id = $1 AND lease_owner = $2 AND status = 'RUNNING'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(worker_id.as_str())
        .bind(self.lease_deadline(now))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::LeaseLost { job_id, at: now });
        }
        Ok(())
    }

    async fn release_expired(&self) -> Result<u64, LedgerError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'PENDING', attempt_count = GREATEST(attempt_count - 1, 0),
                lease_owner = NULL, lease_expires_at = NULL, updated_at = $1
            WHERE status = 'RUNNING' AND lease_expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::info!(count = reclaimed, "Reclaimed expired job leases");
        }
        Ok(reclaimed)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<ProcessingJob>, LedgerError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(Self::map_job).transpose()
    }

    async fn get_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<Document>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, source_locator, owner, content_type, content_hash, created_at, updated_at \
             FROM documents WHERE id = $1",
        )
        .bind(document_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(Self::map_document).transpose()
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn document_progress(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<DocumentProgress>, LedgerError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM documents WHERE id = $1")
                .bind(document_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;

        let Some(status) = status else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE document_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(document_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let jobs: Vec<ProcessingJob> = rows
            .iter()
            .map(Self::map_job)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DocumentProgress {
            document_id,
            status: DocumentStatus::from_str(&status).map_err(LedgerError::Storage)?,
            stages: StageProgress::aggregate(&jobs),
            last_error: most_recent_error(&jobs),
        }))
    }

    async fn find_completed_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Document>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, source_locator, owner, content_type, content_hash, created_at, updated_at \
             FROM documents WHERE content_hash = $1 AND status = $2 LIMIT 1",
        )
        .bind(content_hash)
        .bind(DocumentStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(Self::map_document).transpose()
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn cancel_document(&self, document_id: DocumentId) -> Result<(), LedgerError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET cancelled_at = COALESCE(cancelled_at, $2),
                status = CASE WHEN status = $3 THEN $4 ELSE status END,
                updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(document_id.as_uuid())
        .bind(now)
        .bind(DocumentStatus::InProgress.as_str())
        .bind(DocumentStatus::Cancelled.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DocumentNotFound(document_id));
        }
        tracing::info!("Document cancelled");
        Ok(())
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn purge_document(&self, document_id: DocumentId) -> Result<(), LedgerError> {
        // Jobs and chunk rows go with the document via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DocumentNotFound(document_id));
        }
        tracing::info!("Document purged from ledger");
        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn encode_outputs(outputs: &StageOutputs) -> Result<serde_json::Value, LedgerError> {
    serde_json::to_value(outputs).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode_outputs(value: serde_json::Value) -> Result<StageOutputs, LedgerError> {
    serde_json::from_value(value).map_err(|e| LedgerError::Serialization(e.to_string()))
}
