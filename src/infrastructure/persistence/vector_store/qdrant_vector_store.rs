use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId, PointStruct, PointsIdsList,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::ports::{ChunkPoint, SearchHit, VectorStore, VectorStoreError};
use crate::domain::{ChunkId, DocumentId, Embedding};

pub struct QdrantVectorStore {
    client: Arc<Qdrant>,
    collection_name: String,
}

impl QdrantVectorStore {
    pub async fn new(url: &str, collection_name: String) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            collection_name,
        })
    }

    pub fn with_client(client: Arc<Qdrant>, collection_name: String) -> Self {
        Self {
            client,
            collection_name,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    #[instrument(skip(self), fields(collection = %self.collection_name))]
    async fn ensure_collection(&self, dimensions: u64) -> Result<bool, VectorStoreError> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))?;
        if exists {
            return Ok(false);
        }

        let vectors_config =
            VectorsConfig::from(VectorParamsBuilder::new(dimensions, Distance::Cosine));

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name).vectors_config(vectors_config),
            )
            .await
            .map_err(|e| VectorStoreError::CollectionCreationFailed(e.to_string()))?;

        info!(collection = %self.collection_name, "collection_created");
        Ok(true)
    }

    #[instrument(skip(self, points), fields(collection = %self.collection_name, count = points.len()))]
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let qdrant_points: Vec<PointStruct> = points
            .iter()
            .map(|point| {
                let mut payload = Payload::new();
                payload.insert("document_id", point.document_id.as_uuid().to_string());
                payload.insert("ordinal", point.ordinal as i64);
                payload.insert("text", point.text.clone());
                if let Some(page) = point.page {
                    payload.insert("page", page as i64);
                }

                PointStruct::new(
                    PointId::from(point.chunk_id.as_uuid().to_string()),
                    point.vector.values.clone(),
                    payload,
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(
                &self.collection_name,
                qdrant_points,
            ))
            .await
            .map_err(|e| VectorStoreError::UpsertFailed(e.to_string()))?;

        info!(count = points.len(), "points_upserted");
        Ok(())
    }

    #[instrument(skip(self, query), fields(collection = %self.collection_name, top_k = top_k))]
    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(
                    &self.collection_name,
                    query.values.clone(),
                    top_k as u64,
                )
                .with_payload(true),
            )
            .await
            .map_err(|e| VectorStoreError::SearchFailed(e.to_string()))?;

        let hits: Vec<SearchHit> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let chunk_id = match point.id?.point_id_options? {
                    qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid) => {
                        Uuid::parse_str(&uuid).ok()?
                    }
                    qdrant_client::qdrant::point_id::PointIdOptions::Num(_) => return None,
                };

                let document_id_str = point.payload.get("document_id")?.as_str()?;
                let document_id = Uuid::parse_str(document_id_str).ok()?;

                Some(SearchHit {
                    chunk_id: ChunkId::from_uuid(chunk_id),
                    document_id: DocumentId::from_uuid(document_id),
                    score: point.score,
                })
            })
            .collect();

        Ok(hits)
    }

    #[instrument(skip(self, chunk_ids), fields(collection = %self.collection_name, count = chunk_ids.len()))]
    async fn delete(&self, chunk_ids: &[ChunkId]) -> Result<(), VectorStoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<PointId> = chunk_ids
            .iter()
            .map(|id| PointId::from(id.as_uuid().to_string()))
            .collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(PointsIdsList { ids: point_ids }),
            )
            .await
            .map_err(|e| VectorStoreError::DeleteFailed(e.to_string()))?;

        info!(count = chunk_ids.len(), "points_deleted");
        Ok(())
    }
}
