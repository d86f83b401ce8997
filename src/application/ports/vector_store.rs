use async_trait::async_trait;

use super::VectorStoreError;
use crate::domain::{ChunkId, DocumentId, Embedding};

/// One upsertable point: chunk id, vector, and the metadata exposed to
/// search consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPoint {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub ordinal: u32,
    pub text: String,
    pub page: Option<u32>,
    pub vector: Embedding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns true if the collection had to be created.
    async fn ensure_collection(&self, dimensions: u64) -> Result<bool, VectorStoreError>;

    /// Keyed by chunk id; reinsertion of unchanged data is a no-op.
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), VectorStoreError>;

    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError>;

    async fn delete(&self, chunk_ids: &[ChunkId]) -> Result<(), VectorStoreError>;
}
