use std::sync::Arc;

use async_trait::async_trait;

use super::StageRunner;
use crate::application::ports::{ChunkPoint, ChunkRepository, VectorStore};
use crate::domain::{ProcessingJob, Stage, StageFailure, StageOutputs};

/// Commits every embedded chunk of the document to the vector store. Runs
/// once per document, only after the Embed fan-in gate opens. Upsert is
/// keyed by chunk id, so a retry re-sends only work the store has not
/// already made durable.
pub struct StoreRunner {
    chunk_repository: Arc<dyn ChunkRepository>,
    vector_store: Arc<dyn VectorStore>,
    dimensions: u64,
}

impl StoreRunner {
    pub fn new(
        chunk_repository: Arc<dyn ChunkRepository>,
        vector_store: Arc<dyn VectorStore>,
        dimensions: u64,
    ) -> Self {
        Self {
            chunk_repository,
            vector_store,
            dimensions,
        }
    }
}

#[async_trait]
impl StageRunner for StoreRunner {
    fn stage(&self) -> Stage {
        Stage::Store
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, document_id = %job.document_id))]
    async fn run(&self, job: &ProcessingJob) -> Result<StageOutputs, StageFailure> {
        let chunks = self
            .chunk_repository
            .list_by_document(job.document_id)
            .await
            .map_err(|e| StageFailure::transient(e.to_string()))?;

        if chunks.is_empty() {
            return Err(StageFailure::malformed("no chunks to store"));
        }

        let mut points: Vec<ChunkPoint> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let Some(embedding) = &chunk.embedding else {
                // The fan-in gate means every sibling completed; a missing
                // vector is a write that has not landed yet.
                return Err(StageFailure::transient(format!(
                    "chunk {} has no embedding yet",
                    chunk.id
                )));
            };
            points.push(ChunkPoint {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
                page: chunk.span.page,
                vector: embedding.clone(),
            });
        }

        self.vector_store
            .ensure_collection(self.dimensions)
            .await
            .map_err(StageFailure::from)?;

        self.vector_store
            .upsert(&points)
            .await
            .map_err(StageFailure::from)?;

        tracing::info!(point_count = points.len(), "Vectors committed");

        Ok(StageOutputs::Stored {
            point_count: points.len(),
        })
    }
}
