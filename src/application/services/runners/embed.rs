use std::sync::Arc;

use async_trait::async_trait;

use super::StageRunner;
use crate::application::ports::{ChunkRepository, Embedder, JobLedger};
use crate::domain::{
    ChunkId, DocumentChunk, JobId, ProcessingJob, Stage, StageFailure, StageOutputs, WorkerId,
};

/// Embeds one chunk per job. For upstream efficiency the runner may pull up
/// to `batch_size - 1` additional Embed jobs under the same lease owner and
/// coalesce them into a single service call; the Ledger keeps tracking each
/// chunk as its own job, and a batch failure is reported per chunk.
pub struct EmbedRunner {
    ledger: Arc<dyn JobLedger>,
    chunk_repository: Arc<dyn ChunkRepository>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl EmbedRunner {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        chunk_repository: Arc<dyn ChunkRepository>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            ledger,
            chunk_repository,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    async fn load_chunk(&self, chunk_id: ChunkId) -> Result<DocumentChunk, StageFailure> {
        self.chunk_repository
            .get(chunk_id)
            .await
            .map_err(|e| StageFailure::transient(e.to_string()))?
            .ok_or_else(|| StageFailure::malformed(format!("chunk row missing: {chunk_id}")))
    }

    /// Extra jobs claimed into this batch are completed or failed here; the
    /// primary job's outcome is returned to the worker as usual.
    async fn settle_extra(
        &self,
        job_id: JobId,
        chunk_id: ChunkId,
        result: &Result<(), StageFailure>,
    ) {
        let outcome = match result {
            Ok(()) => {
                self.ledger
                    .complete(job_id, StageOutputs::Embedded { chunk_id })
                    .await
            }
            Err(failure) => self.ledger.fail(job_id, failure).await,
        };
        if let Err(e) = outcome {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to settle batched embed job");
        }
    }
}

#[async_trait]
impl StageRunner for EmbedRunner {
    fn stage(&self) -> Stage {
        Stage::Embed
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, document_id = %job.document_id))]
    async fn run(&self, job: &ProcessingJob) -> Result<StageOutputs, StageFailure> {
        let chunk_id = job
            .chunk_id
            .ok_or_else(|| StageFailure::malformed("embed job carries no chunk id"))?;

        let chunk = self.load_chunk(chunk_id).await?;
        if chunk.embedding.is_some() {
            // Re-run after a crash between the repository write and
            // `complete`; the vector is already durable.
            return Ok(StageOutputs::Embedded { chunk_id });
        }

        let worker_id = job
            .lease_owner
            .clone()
            .map(WorkerId::from_raw)
            .ok_or_else(|| StageFailure::transient("embed job has no lease owner"))?;

        let mut extras: Vec<(JobId, DocumentChunk)> = Vec::new();
        while extras.len() + 1 < self.batch_size {
            let claimed = self
                .ledger
                .claim_next(Stage::Embed, &worker_id)
                .await
                .map_err(|e| StageFailure::transient(e.to_string()))?;
            let Some(extra_job) = claimed else { break };

            let Some(extra_chunk_id) = extra_job.chunk_id else {
                let failure = StageFailure::malformed("embed job carries no chunk id");
                self.ledger
                    .fail(extra_job.id, &failure)
                    .await
                    .unwrap_or_else(
                        |e| tracing::warn!(job_id = %extra_job.id, error = %e, "fail() rejected"),
                    );
                continue;
            };

            match self.load_chunk(extra_chunk_id).await {
                Ok(extra_chunk) if extra_chunk.embedding.is_some() => {
                    self.settle_extra(extra_job.id, extra_chunk_id, &Ok(())).await;
                }
                Ok(extra_chunk) => extras.push((extra_job.id, extra_chunk)),
                Err(failure) => {
                    self.settle_extra(extra_job.id, extra_chunk_id, &Err(failure)).await;
                }
            }
        }

        let mut texts: Vec<&str> = Vec::with_capacity(extras.len() + 1);
        texts.push(chunk.text.as_str());
        texts.extend(extras.iter().map(|(_, c)| c.text.as_str()));

        let embeddings = match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) if embeddings.len() == texts.len() => embeddings,
            Ok(embeddings) => {
                let failure = StageFailure::transient(format!(
                    "embedding count mismatch: expected {}, got {}",
                    texts.len(),
                    embeddings.len()
                ));
                for (extra_id, extra_chunk) in &extras {
                    self.settle_extra(*extra_id, extra_chunk.id, &Err(failure.clone()))
                        .await;
                }
                return Err(failure);
            }
            Err(e) => {
                // One upstream failure, one retryable failure per chunk.
                let failure = StageFailure::from(e);
                for (extra_id, extra_chunk) in &extras {
                    self.settle_extra(*extra_id, extra_chunk.id, &Err(failure.clone()))
                        .await;
                }
                return Err(failure);
            }
        };

        let mut embeddings = embeddings.into_iter();
        let primary_embedding = embeddings.next().expect("length checked above");

        // Extras settle first so none of them stays leased if the primary
        // write below fails.
        for ((extra_id, extra_chunk), embedding) in extras.iter().zip(embeddings) {
            let result = self
                .chunk_repository
                .set_embedding(extra_chunk.id, &embedding)
                .await
                .map_err(|e| StageFailure::transient(e.to_string()));
            self.settle_extra(*extra_id, extra_chunk.id, &result).await;
        }

        self.chunk_repository
            .set_embedding(chunk_id, &primary_embedding)
            .await
            .map_err(|e| StageFailure::transient(e.to_string()))?;

        Ok(StageOutputs::Embedded { chunk_id })
    }
}
