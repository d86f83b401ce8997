use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::StageRunner;
use crate::application::ports::{BlobStore, ContentExtractor, JobLedger};
use crate::domain::{
    ProcessingJob, Stage, StageFailure, StageOutputs, StagedImage, StoragePath,
};

/// Pulls text blocks and image regions out of the source bytes, stages the
/// image bytes, and hands durable references on to Annotate.
pub struct ExtractRunner {
    ledger: Arc<dyn JobLedger>,
    blob_store: Arc<dyn BlobStore>,
    extractor: Arc<dyn ContentExtractor>,
}

impl ExtractRunner {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        blob_store: Arc<dyn BlobStore>,
        extractor: Arc<dyn ContentExtractor>,
    ) -> Self {
        Self {
            ledger,
            blob_store,
            extractor,
        }
    }
}

#[async_trait]
impl StageRunner for ExtractRunner {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, document_id = %job.document_id))]
    async fn run(&self, job: &ProcessingJob) -> Result<StageOutputs, StageFailure> {
        let document = self
            .ledger
            .get_document(job.document_id)
            .await
            .map_err(|e| StageFailure::transient(e.to_string()))?
            .ok_or_else(|| StageFailure::malformed("document row missing"))?;

        let data = self
            .blob_store
            .fetch(&document.source_locator)
            .await
            .map_err(StageFailure::from)?;

        let content = self
            .extractor
            .extract(&data, &document)
            .await
            .map_err(StageFailure::from)?;

        tracing::info!(
            blocks = content.blocks.len(),
            images = content.images.len(),
            "Extraction complete"
        );

        let mut staged: Vec<StagedImage> = Vec::with_capacity(content.images.len());
        for (index, image) in content.images.iter().enumerate() {
            let key = StoragePath::staged_image(&document.id, index);
            self.blob_store
                .put(&key, Bytes::from(image.bytes.clone()))
                .await
                .map_err(StageFailure::from)?;
            staged.push(StagedImage {
                key,
                page: image.page,
                position: image.position,
            });
        }

        Ok(StageOutputs::Extracted {
            blocks: content.blocks,
            images: staged,
        })
    }
}
