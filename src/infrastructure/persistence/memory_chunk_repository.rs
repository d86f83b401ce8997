use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::application::ports::{ChunkRepository, RepositoryError};
use crate::domain::{ChunkId, DocumentChunk, DocumentId, Embedding};

/// In-memory chunk rows; append-only by content-addressed id, matching the
/// Postgres adapter's `ON CONFLICT DO NOTHING` behavior.
#[derive(Default)]
pub struct MemoryChunkRepository {
    chunks: Mutex<HashMap<ChunkId, DocumentChunk>>,
}

impl MemoryChunkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkRepository for MemoryChunkRepository {
    async fn insert_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), RepositoryError> {
        let mut store = self.chunks.lock().await;
        for chunk in chunks {
            store.entry(chunk.id).or_insert_with(|| chunk.clone());
        }
        Ok(())
    }

    async fn set_embedding(
        &self,
        chunk_id: ChunkId,
        embedding: &Embedding,
    ) -> Result<(), RepositoryError> {
        let mut store = self.chunks.lock().await;
        let chunk = store
            .get_mut(&chunk_id)
            .ok_or_else(|| RepositoryError::NotFound(chunk_id.to_string()))?;
        chunk.embedding = Some(embedding.clone());
        Ok(())
    }

    async fn get(&self, chunk_id: ChunkId) -> Result<Option<DocumentChunk>, RepositoryError> {
        let store = self.chunks.lock().await;
        Ok(store.get(&chunk_id).cloned())
    }

    async fn list_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<DocumentChunk>, RepositoryError> {
        let store = self.chunks.lock().await;
        let mut chunks: Vec<DocumentChunk> = store
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    async fn delete_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ChunkId>, RepositoryError> {
        let mut store = self.chunks.lock().await;
        let ids: Vec<ChunkId> = store
            .values()
            .filter(|c| c.document_id == document_id)
            .map(|c| c.id)
            .collect();
        for id in &ids {
            store.remove(id);
        }
        Ok(ids)
    }
}
