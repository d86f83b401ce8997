use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::application::ports::{
    most_recent_error, DocumentProgress, JobLedger, LedgerError, StageProgress,
};
use crate::domain::{
    Document, DocumentId, DocumentStatus, JobId, JobStatus, ProcessingJob, RetryPolicy, Stage,
    StageFailure, StageOutputs, WorkerId,
};
use crate::infrastructure::observability::sanitize_error;

struct DocumentRow {
    document: Document,
    status: DocumentStatus,
    cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct LedgerState {
    documents: HashMap<DocumentId, DocumentRow>,
    jobs: HashMap<JobId, ProcessingJob>,
}

/// In-memory Ledger adapter. A single mutex over the whole state makes every
/// operation linearizable by construction; used by tests and local runs,
/// with the same transition semantics as the Postgres adapter.
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    policy: RetryPolicy,
    lease_ttl: Duration,
}

impl MemoryLedger {
    pub fn new(policy: RetryPolicy, lease_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            policy,
            lease_ttl,
        }
    }

    fn chrono_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_ttl).unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// Everything `complete` does after the SUCCEEDED transition: hand the
    /// outputs to the next stage, fan out, or close the document.
    fn advance(state: &mut LedgerState, job_id: JobId, now: DateTime<Utc>) {
        let job = match state.jobs.get(&job_id) {
            Some(j) => j.clone(),
            None => return,
        };

        let cancelled = state
            .documents
            .get(&job.document_id)
            .map(|d| d.cancelled_at.is_some())
            .unwrap_or(true);
        if cancelled {
            tracing::debug!(job_id = %job_id, "Document cancelled, stopping stage chain");
            return;
        }

        match (job.stage, job.outputs.clone()) {
            (Stage::Chunk, Some(StageOutputs::Chunked { chunk_ids })) if !chunk_ids.is_empty() => {
                if let Some(parent) = state.jobs.get_mut(&job_id) {
                    parent.pending_children = Some(chunk_ids.len() as u32);
                    parent.updated_at = now;
                }
                for chunk_id in chunk_ids {
                    let child = ProcessingJob::embed_child(job.document_id, job_id, chunk_id);
                    state.jobs.insert(child.id, child);
                }
            }
            (Stage::Embed, _) => {
                let parent_id = match job.parent_job_id {
                    Some(id) => id,
                    None => return,
                };
                let remaining = match state.jobs.get_mut(&parent_id) {
                    Some(parent) => {
                        let left = parent.pending_children.unwrap_or(0).saturating_sub(1);
                        parent.pending_children = Some(left);
                        parent.updated_at = now;
                        left
                    }
                    None => return,
                };
                if remaining == 0 {
                    let store = ProcessingJob::new(job.document_id, Stage::Store, None);
                    state.jobs.insert(store.id, store);
                }
            }
            (Stage::Store, _) => {
                if let Some(doc) = state.documents.get_mut(&job.document_id) {
                    doc.status = DocumentStatus::Completed;
                    doc.document.updated_at = now;
                }
            }
            (stage, outputs) => {
                if let Some(next) = stage.next() {
                    let next_job = ProcessingJob::new(job.document_id, next, outputs);
                    state.jobs.insert(next_job.id, next_job);
                }
            }
        }
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn register_document(&self, document: &Document) -> Result<Vec<JobId>, LedgerError> {
        let mut state = self.state.lock().await;

        let existing_completed = state
            .documents
            .values()
            .find(|row| {
                row.document.content_hash == document.content_hash
                    && row.status == DocumentStatus::Completed
            })
            .map(|row| row.document.id);
        if let Some(existing_id) = existing_completed {
            tracing::info!(
                document_id = %existing_id,
                content_hash = %document.content_hash,
                "Identical content already processed, skipping registration"
            );
            let mut job_ids: Vec<JobId> = state
                .jobs
                .values()
                .filter(|j| j.document_id == existing_id)
                .map(|j| j.id)
                .collect();
            job_ids.sort_by_key(|id| id.as_uuid());
            return Ok(job_ids);
        }

        let extract = ProcessingJob::new(document.id, Stage::Extract, None);
        let job_id = extract.id;

        state.documents.insert(
            document.id,
            DocumentRow {
                document: document.clone(),
                status: DocumentStatus::InProgress,
                cancelled_at: None,
            },
        );
        state.jobs.insert(job_id, extract);

        Ok(vec![job_id])
    }

    async fn claim_next(
        &self,
        stage: Stage,
        worker_id: &WorkerId,
    ) -> Result<Option<ProcessingJob>, LedgerError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let candidate = state
            .jobs
            .values()
            .filter(|job| job.stage == stage)
            .filter(|job| match job.status {
                JobStatus::Pending => true,
                JobStatus::RetryScheduled => {
                    job.next_attempt_at.map(|t| t <= now).unwrap_or(true)
                }
                _ => false,
            })
            .filter(|job| {
                state
                    .documents
                    .get(&job.document_id)
                    .map(|d| d.cancelled_at.is_none())
                    .unwrap_or(false)
            })
            .min_by_key(|job| (job.created_at, job.id.as_uuid()))
            .map(|job| job.id);

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let ttl = self.chrono_ttl();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(LedgerError::JobNotFound(job_id))?;
        job.status = JobStatus::Running;
        job.attempt_count += 1;
        job.lease_owner = Some(worker_id.as_str().to_string());
        job.lease_expires_at = Some(now + ttl);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: JobId, outputs: StageOutputs) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(LedgerError::JobNotFound(job_id))?;
        if job.status != JobStatus::Running {
            return Err(LedgerError::LeaseLost { job_id, at: now });
        }

        job.status = JobStatus::Succeeded;
        job.outputs = Some(outputs);
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = now;

        Self::advance(&mut state, job_id, now);
        Ok(())
    }

    async fn fail(&self, job_id: JobId, failure: &StageFailure) -> Result<(), LedgerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Utc::now();

        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(LedgerError::JobNotFound(job_id))?;
        if job.status != JobStatus::Running {
            return Err(LedgerError::LeaseLost { job_id, at: now });
        }

        let attempt_count = job.attempt_count;
        job.last_error = Some(sanitize_error(&failure.to_string()));
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = now;

        if failure.is_retryable() && self.policy.attempts_remaining(failure.kind, attempt_count) {
            let delay = self.policy.delay_after(failure, attempt_count);
            job.status = JobStatus::RetryScheduled;
            job.next_attempt_at = Some(
                now + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(1)),
            );
            tracing::warn!(
                job_id = %job_id,
                stage = %job.stage,
                attempt = attempt_count,
                delay_ms = delay.as_millis() as u64,
                "Stage failed, retry scheduled"
            );
        } else {
            job.status = JobStatus::Failed;
            let document_id = job.document_id;
            tracing::error!(
                job_id = %job_id,
                stage = %job.stage,
                attempt = attempt_count,
                kind = %failure.kind,
                "Stage terminally failed"
            );
            if let Some(doc) = state.documents.get_mut(&document_id) {
                if doc.status == DocumentStatus::InProgress {
                    doc.status = DocumentStatus::Failed;
                    doc.document.updated_at = now;
                }
            }
        }

        Ok(())
    }

    async fn heartbeat(&self, job_id: JobId, worker_id: &WorkerId) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let ttl = self.chrono_ttl();

        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(LedgerError::JobNotFound(job_id))?;

        let owns_lease = job.status == JobStatus::Running
            && job.lease_owner.as_deref() == Some(worker_id.as_str());
        if !owns_lease {
            return Err(LedgerError::LeaseLost { job_id, at: now });
        }

        job.lease_expires_at = Some(now + ttl);
        job.updated_at = now;
        Ok(())
    }

    async fn release_expired(&self) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut reclaimed = 0u64;

        for job in state.jobs.values_mut() {
            if job.lease_expired(now) {
                job.status = JobStatus::Pending;
                // Crash recovery is invisible: the interrupted attempt is
                // handed back without consuming retry budget.
                job.attempt_count = job.attempt_count.saturating_sub(1);
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.updated_at = now;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            tracing::info!(count = reclaimed, "Reclaimed expired job leases");
        }
        Ok(reclaimed)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<ProcessingJob>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn get_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<Document>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .documents
            .get(&document_id)
            .map(|row| row.document.clone()))
    }

    async fn document_progress(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<DocumentProgress>, LedgerError> {
        let state = self.state.lock().await;

        let Some(row) = state.documents.get(&document_id) else {
            return Ok(None);
        };

        let jobs: Vec<ProcessingJob> = state
            .jobs
            .values()
            .filter(|j| j.document_id == document_id)
            .cloned()
            .collect();

        Ok(Some(DocumentProgress {
            document_id,
            status: row.status,
            stages: StageProgress::aggregate(&jobs),
            last_error: most_recent_error(&jobs),
        }))
    }

    async fn find_completed_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Document>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .documents
            .values()
            .find(|row| {
                row.document.content_hash == content_hash
                    && row.status == DocumentStatus::Completed
            })
            .map(|row| row.document.clone()))
    }

    async fn cancel_document(&self, document_id: DocumentId) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let row = state
            .documents
            .get_mut(&document_id)
            .ok_or(LedgerError::DocumentNotFound(document_id))?;

        if row.cancelled_at.is_none() {
            row.cancelled_at = Some(now);
            if !row.status.is_terminal() {
                row.status = DocumentStatus::Cancelled;
            }
            row.document.updated_at = now;
            tracing::info!(document_id = %document_id, "Document cancelled");
        }
        Ok(())
    }

    async fn purge_document(&self, document_id: DocumentId) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;

        state
            .documents
            .remove(&document_id)
            .ok_or(LedgerError::DocumentNotFound(document_id))?;
        state.jobs.retain(|_, job| job.document_id != document_id);

        tracing::info!(document_id = %document_id, "Document purged from ledger");
        Ok(())
    }
}
