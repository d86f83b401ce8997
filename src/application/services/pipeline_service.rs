use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::application::ports::{
    BlobStore, BlobStoreError, ChunkRepository, DocumentProgress, JobLedger, LedgerError,
    RepositoryError, SearchHit, VectorStore, VectorStoreError,
};
use crate::domain::{ContentType, Document, DocumentId, Embedding, JobId, StoragePath};

/// The pipeline's outward face: registration, status, cancellation, purge
/// and pass-through search. Everything else happens inside the worker pools.
pub struct PipelineService {
    ledger: Arc<dyn JobLedger>,
    chunk_repository: Arc<dyn ChunkRepository>,
    vector_store: Arc<dyn VectorStore>,
    blob_store: Arc<dyn BlobStore>,
}

/// Ingestion trigger payload: the source bytes are already staged under the
/// locator by the upload layer.
#[derive(Debug, Clone)]
pub struct RegisterDocument {
    pub source_locator: StoragePath,
    pub owner: String,
    pub content_type: ContentType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registered {
    pub document_id: DocumentId,
    pub job_ids: Vec<JobId>,
}

impl PipelineService {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        chunk_repository: Arc<dyn ChunkRepository>,
        vector_store: Arc<dyn VectorStore>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            ledger,
            chunk_repository,
            vector_store,
            blob_store,
        }
    }

    /// Hashes the staged source bytes and creates the document with its
    /// first job. Content that already completed is not re-processed; the
    /// existing job ids come back instead.
    #[tracing::instrument(skip(self, request), fields(locator = %request.source_locator))]
    pub async fn register_document(
        &self,
        request: RegisterDocument,
    ) -> Result<Registered, PipelineError> {
        let data = self.blob_store.fetch(&request.source_locator).await?;
        let content_hash = format!("{:x}", Sha256::digest(&data));

        if let Some(existing) = self.ledger.find_completed_by_hash(&content_hash).await? {
            let job_ids = match self.ledger.register_document(&existing).await {
                Ok(ids) => ids,
                Err(e) => return Err(e.into()),
            };
            return Ok(Registered {
                document_id: existing.id,
                job_ids,
            });
        }

        let document = Document::new(
            request.source_locator,
            request.owner,
            request.content_type,
            content_hash,
        );
        let document_id = document.id;
        let job_ids = self.ledger.register_document(&document).await?;

        tracing::info!(document_id = %document_id, jobs = job_ids.len(), "Document registered");
        Ok(Registered {
            document_id,
            job_ids,
        })
    }

    /// Stages raw bytes under a fresh locator, then registers them. Mostly
    /// for callers that do not run their own upload path.
    pub async fn register_bytes(
        &self,
        data: Bytes,
        owner: String,
        content_type: ContentType,
    ) -> Result<Registered, PipelineError> {
        let staging_id = DocumentId::new();
        let locator = StoragePath::source(&staging_id);
        self.blob_store.put(&locator, data).await?;

        self.register_document(RegisterDocument {
            source_locator: locator,
            owner,
            content_type,
        })
        .await
    }

    pub async fn get_status(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<DocumentProgress>, PipelineError> {
        Ok(self.ledger.document_progress(document_id).await?)
    }

    pub async fn cancel(&self, document_id: DocumentId) -> Result<(), PipelineError> {
        Ok(self.ledger.cancel_document(document_id).await?)
    }

    /// The only deletion path: chunks, vectors, staged source, then the
    /// ledger rows. Outstanding jobs die with the document.
    #[tracing::instrument(skip(self), fields(document_id = %document_id))]
    pub async fn purge(&self, document_id: DocumentId) -> Result<(), PipelineError> {
        self.ledger.cancel_document(document_id).await?;

        let chunk_ids = self.chunk_repository.delete_by_document(document_id).await?;
        self.vector_store.delete(&chunk_ids).await?;

        if let Some(document) = self.ledger.get_document(document_id).await? {
            if let Err(e) = self.blob_store.delete(&document.source_locator).await {
                tracing::warn!(error = %e, "Failed to delete staged source during purge");
            }
        }

        self.ledger.purge_document(document_id).await?;
        tracing::info!(chunks = chunk_ids.len(), "Document purged");
        Ok(())
    }

    /// Pass-through to the vector store; ranking is the store's.
    pub async fn search(
        &self,
        query_vector: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        Ok(self.vector_store.search(query_vector, top_k).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("chunk repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error("vector store: {0}")]
    VectorStore(#[from] VectorStoreError),
    #[error("staging store: {0}")]
    Staging(#[from] BlobStoreError),
}
