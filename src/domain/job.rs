use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chunk::ChunkId;
use super::document::DocumentId;
use super::extraction::{StagedImage, TextBlock};
use super::job_status::JobStatus;
use super::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity a worker presents when claiming and heartbeating.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(stage: Stage, index: usize) -> Self {
        Self(format!(
            "{}-{}-{}",
            stage.as_str().to_lowercase(),
            index,
            Uuid::new_v4().simple()
        ))
    }

    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a completed stage hands to the next one, persisted on the job row.
/// The Ledger copies a job's outputs into the payload of the job it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutputs {
    Extracted {
        blocks: Vec<TextBlock>,
        images: Vec<StagedImage>,
    },
    Annotated {
        text: String,
    },
    Chunked {
        chunk_ids: Vec<ChunkId>,
    },
    Embedded {
        chunk_id: ChunkId,
    },
    Stored {
        point_count: usize,
    },
}

/// One Ledger-tracked unit of work: a (document, stage) pair, or a
/// (chunk, Embed) pair for fan-out children.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub id: JobId,
    pub document_id: DocumentId,
    pub stage: Stage,
    pub status: JobStatus,
    /// Attempts started; incremented when a claim transitions the job to
    /// RUNNING. Lease reclamation after a crash rolls it back.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Fan-in counter, set on the Chunk job when it fans out Embed children.
    pub pending_children: Option<u32>,
    pub parent_job_id: Option<JobId>,
    pub chunk_id: Option<ChunkId>,
    pub payload: Option<StageOutputs>,
    pub outputs: Option<StageOutputs>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(document_id: DocumentId, stage: Stage, payload: Option<StageOutputs>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            document_id,
            stage,
            status: JobStatus::Pending,
            attempt_count: 0,
            last_error: None,
            next_attempt_at: None,
            lease_owner: None,
            lease_expires_at: None,
            pending_children: None,
            parent_job_id: None,
            chunk_id: None,
            payload,
            outputs: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// An Embed fan-out child for one chunk of the fanned-out parent.
    pub fn embed_child(document_id: DocumentId, parent_job_id: JobId, chunk_id: ChunkId) -> Self {
        let mut job = Self::new(document_id, Stage::Embed, None);
        job.parent_job_id = Some(parent_job_id);
        job.chunk_id = Some(chunk_id);
        job
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running
            && self.lease_expires_at.map(|t| t <= now).unwrap_or(true)
    }
}
