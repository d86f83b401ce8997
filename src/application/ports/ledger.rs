use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Document, DocumentId, DocumentStatus, JobId, JobStatus, ProcessingJob, Stage, StageFailure,
    StageOutputs, WorkerId,
};

/// Per-stage view returned by `document_progress`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageProgress {
    pub stage: Stage,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Completed / total, meaningful for the fan-out stage.
    pub completed_units: u32,
    pub total_units: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentProgress {
    pub document_id: DocumentId,
    pub status: DocumentStatus,
    pub stages: Vec<StageProgress>,
    /// Sanitized, truncated message from the most recent failure.
    pub last_error: Option<String>,
}

impl StageProgress {
    /// Rolls a document's job rows up into one row per stage. Fan-out stages
    /// aggregate their children: failed if any child failed, succeeded only
    /// when every child is.
    pub fn aggregate(jobs: &[ProcessingJob]) -> Vec<StageProgress> {
        Stage::ALL
            .iter()
            .filter_map(|stage| {
                let of_stage: Vec<&ProcessingJob> =
                    jobs.iter().filter(|j| j.stage == *stage).collect();
                if of_stage.is_empty() {
                    return None;
                }

                let total = of_stage.len() as u32;
                let completed = of_stage
                    .iter()
                    .filter(|j| j.status == JobStatus::Succeeded)
                    .count() as u32;

                let status = if of_stage.iter().any(|j| j.status == JobStatus::Failed) {
                    JobStatus::Failed
                } else if completed == total {
                    JobStatus::Succeeded
                } else if of_stage.iter().any(|j| j.status == JobStatus::Running) {
                    JobStatus::Running
                } else if of_stage
                    .iter()
                    .any(|j| j.status == JobStatus::RetryScheduled)
                {
                    JobStatus::RetryScheduled
                } else {
                    JobStatus::Pending
                };

                Some(StageProgress {
                    stage: *stage,
                    status,
                    attempt_count: of_stage.iter().map(|j| j.attempt_count).max().unwrap_or(0),
                    last_error: latest_error(&of_stage),
                    completed_units: completed,
                    total_units: total,
                })
            })
            .collect()
    }
}

fn latest_error(jobs: &[&ProcessingJob]) -> Option<String> {
    jobs.iter()
        .filter(|j| j.last_error.is_some())
        .max_by_key(|j| j.updated_at)
        .and_then(|j| j.last_error.clone())
}

/// The most recent failure message across all of a document's jobs.
pub fn most_recent_error(jobs: &[ProcessingJob]) -> Option<String> {
    let refs: Vec<&ProcessingJob> = jobs.iter().collect();
    latest_error(&refs)
}

/// Durable record and state machine of each document's stage progress. The
/// single point of cross-worker coordination: claim, complete, fail and
/// heartbeat are atomic and linearizable against the backing store.
///
/// Retry policy lives entirely behind `fail`; adapters and runners never
/// schedule their own retries.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Creates the document row and its Extract job in one transaction.
    /// Re-registering content that already completed (same content hash)
    /// creates nothing and returns the existing job ids.
    async fn register_document(&self, document: &Document) -> Result<Vec<JobId>, LedgerError>;

    /// Atomically selects one PENDING or due RETRY_SCHEDULED job of the
    /// stage whose document is not cancelled, marks it RUNNING, starts the
    /// attempt and takes the lease.
    async fn claim_next(
        &self,
        stage: Stage,
        worker_id: &WorkerId,
    ) -> Result<Option<ProcessingJob>, LedgerError>;

    /// RUNNING → SUCCEEDED; stores outputs and creates the next stage's job.
    /// Chunk outputs fan out one Embed child per chunk; an Embed child's
    /// completion decrements the parent's fan-in counter, and the last one
    /// creates the single Store job. Rejected with `LeaseLost` when the job
    /// is no longer RUNNING (the sweeper reclaimed it meanwhile).
    async fn complete(&self, job_id: JobId, outputs: StageOutputs) -> Result<(), LedgerError>;

    /// Applies the retry policy: RETRY_SCHEDULED with backoff while budget
    /// remains and the failure is retryable, FAILED otherwise. A terminal
    /// failure marks the owning document FAILED.
    async fn fail(&self, job_id: JobId, failure: &StageFailure) -> Result<(), LedgerError>;

    /// Extends the caller's lease; `LeaseLost` if it moved.
    async fn heartbeat(&self, job_id: JobId, worker_id: &WorkerId) -> Result<(), LedgerError>;

    /// Sweeper entry point: RUNNING jobs past their lease go back to PENDING
    /// without consuming retry budget. Returns how many were reclaimed.
    async fn release_expired(&self) -> Result<u64, LedgerError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<ProcessingJob>, LedgerError>;

    async fn get_document(&self, document_id: DocumentId)
        -> Result<Option<Document>, LedgerError>;

    async fn document_progress(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<DocumentProgress>, LedgerError>;

    async fn find_completed_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Document>, LedgerError>;

    /// Cooperative cancellation: no further claims for this document; jobs
    /// already running finish their current call and then stop.
    async fn cancel_document(&self, document_id: DocumentId) -> Result<(), LedgerError>;

    /// Removes the document row and every job tracked for it, cancelling
    /// outstanding work. Chunk rows and vector-store points are deleted by
    /// the caller before this; see `PipelineService::purge`.
    async fn purge_document(&self, document_id: DocumentId) -> Result<(), LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),
    #[error("lease lost on job {job_id} at {at}")]
    LeaseLost { job_id: JobId, at: DateTime<Utc> },
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("payload serialization failed: {0}")]
    Serialization(String),
}
