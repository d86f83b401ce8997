use std::sync::Arc;

use async_trait::async_trait;

use super::StageRunner;
use crate::application::ports::{ChunkRepository, Chunker, JobLedger};
use crate::domain::{ProcessingJob, Stage, StageFailure, StageOutputs};

/// Splits the annotated text into content-addressed chunks and persists the
/// rows; the Ledger fans the returned ids out into Embed children.
pub struct ChunkRunner {
    ledger: Arc<dyn JobLedger>,
    chunker: Arc<dyn Chunker>,
    chunk_repository: Arc<dyn ChunkRepository>,
}

impl ChunkRunner {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        chunker: Arc<dyn Chunker>,
        chunk_repository: Arc<dyn ChunkRepository>,
    ) -> Self {
        Self {
            ledger,
            chunker,
            chunk_repository,
        }
    }
}

#[async_trait]
impl StageRunner for ChunkRunner {
    fn stage(&self) -> Stage {
        Stage::Chunk
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, document_id = %job.document_id))]
    async fn run(&self, job: &ProcessingJob) -> Result<StageOutputs, StageFailure> {
        let text = match &job.payload {
            Some(StageOutputs::Annotated { text }) => text.clone(),
            _ => {
                return Err(StageFailure::malformed(
                    "chunk job carries no annotated payload",
                ));
            }
        };

        let document = self
            .ledger
            .get_document(job.document_id)
            .await
            .map_err(|e| StageFailure::transient(e.to_string()))?
            .ok_or_else(|| StageFailure::malformed("document row missing"))?;

        let chunks = self
            .chunker
            .chunk(&text, &document)
            .await
            .map_err(StageFailure::from)?;

        self.chunk_repository
            .insert_chunks(&chunks)
            .await
            .map_err(|e| StageFailure::transient(e.to_string()))?;

        tracing::info!(chunk_count = chunks.len(), "Document chunked");

        Ok(StageOutputs::Chunked {
            chunk_ids: chunks.iter().map(|c| c.id).collect(),
        })
    }
}
