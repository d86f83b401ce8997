use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{ChunkId, DocumentChunk, DocumentId, Embedding};

/// Durable chunk rows. Append-only: inserting a chunk whose id already
/// exists is a no-op, which is what makes re-runs on unchanged content
/// idempotent.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn insert_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), RepositoryError>;

    async fn set_embedding(
        &self,
        chunk_id: ChunkId,
        embedding: &Embedding,
    ) -> Result<(), RepositoryError>;

    async fn get(&self, chunk_id: ChunkId) -> Result<Option<DocumentChunk>, RepositoryError>;

    async fn list_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<DocumentChunk>, RepositoryError>;

    /// Purge support; returns the ids that were removed so callers can also
    /// delete the matching vector-store points.
    async fn delete_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ChunkId>, RepositoryError>;
}
