use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::application::ports::{ChunkPoint, SearchHit, VectorStore, VectorStoreError};
use crate::domain::{ChunkId, Embedding};

/// Map-backed sink with cosine-similarity search. Upsert is keyed by chunk
/// id exactly like the Qdrant adapter, so idempotence tests exercise the
/// same contract.
#[derive(Default)]
pub struct MemoryVectorStore {
    points: Mutex<HashMap<ChunkId, ChunkPoint>>,
    dimensions: Mutex<Option<u64>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.points.lock().await.len()
    }

    pub async fn contains(&self, chunk_id: ChunkId) -> bool {
        self.points.lock().await.contains_key(&chunk_id)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, dimensions: u64) -> Result<bool, VectorStoreError> {
        let mut dims = self.dimensions.lock().await;
        let created = dims.is_none();
        *dims = Some(dimensions);
        Ok(created)
    }

    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), VectorStoreError> {
        let expected = self.dimensions.lock().await.unwrap_or(0) as usize;
        let mut store = self.points.lock().await;
        for point in points {
            if expected > 0 && point.vector.dimensions() != expected {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: point.vector.dimensions(),
                });
            }
            store.insert(point.chunk_id, point.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let store = self.points.lock().await;
        let mut hits: Vec<SearchHit> = store
            .values()
            .map(|point| SearchHit {
                chunk_id: point.chunk_id,
                document_id: point.document_id,
                score: query.cosine_similarity(&point.vector),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, chunk_ids: &[ChunkId]) -> Result<(), VectorStoreError> {
        let mut store = self.points.lock().await;
        for id in chunk_ids {
            store.remove(id);
        }
        Ok(())
    }
}
