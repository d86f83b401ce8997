use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::application::ports::{ChunkRepository, RepositoryError};
use crate::domain::{ChunkId, DocumentChunk, DocumentId, Embedding, SourceSpan};

pub struct PgChunkRepository {
    pool: PgPool,
}

impl PgChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_chunk(row: &PgRow) -> Result<DocumentChunk, RepositoryError> {
        let embedding: Option<Vec<f32>> = row.try_get("embedding").map_err(query_err)?;

        Ok(DocumentChunk {
            id: ChunkId::from_uuid(row.try_get("id").map_err(query_err)?),
            document_id: DocumentId::from_uuid(row.try_get("document_id").map_err(query_err)?),
            ordinal: row.try_get::<i32, _>("ordinal").map_err(query_err)? as u32,
            text: row.try_get("text").map_err(query_err)?,
            embedding: embedding.map(Embedding::new),
            span: SourceSpan {
                page: row
                    .try_get::<Option<i32>, _>("page")
                    .map_err(query_err)?
                    .map(|p| p as u32),
                start: row.try_get::<i64, _>("span_start").map_err(query_err)? as usize,
                end: row.try_get::<i64, _>("span_end").map_err(query_err)? as usize,
            },
            created_at: row.try_get("created_at").map_err(query_err)?,
        })
    }
}

const CHUNK_COLUMNS: &str =
    "id, document_id, ordinal, text, embedding, page, span_start, span_end, created_at";

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn insert_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(query_err)?;

        for chunk in chunks {
            // Content-addressed ids make re-insertion after a retried Chunk
            // stage a no-op.
            sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (id, document_id, ordinal, text, embedding, page, span_start, span_end,
                     created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(chunk.id.as_uuid())
            .bind(chunk.document_id.as_uuid())
            .bind(chunk.ordinal as i32)
            .bind(&chunk.text)
            .bind(chunk.embedding.as_ref().map(|e| e.values.clone()))
            .bind(chunk.span.page.map(|p| p as i32))
            .bind(chunk.span.start as i64)
            .bind(chunk.span.end as i64)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    #[instrument(skip(self, embedding), fields(chunk_id = %chunk_id))]
    async fn set_embedding(
        &self,
        chunk_id: ChunkId,
        embedding: &Embedding,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE document_chunks SET embedding = $2 WHERE id = $1")
            .bind(chunk_id.as_uuid())
            .bind(&embedding.values)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(chunk_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, chunk_id: ChunkId) -> Result<Option<DocumentChunk>, RepositoryError> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM document_chunks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(chunk_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.as_ref().map(Self::map_chunk).transpose()
    }

    async fn list_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<DocumentChunk>, RepositoryError> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks WHERE document_id = $1 ORDER BY ordinal"
        );
        let rows = sqlx::query(&sql)
            .bind(document_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        rows.iter().map(Self::map_chunk).collect()
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn delete_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ChunkId>, RepositoryError> {
        let ids: Vec<uuid::Uuid> =
            sqlx::query_scalar("DELETE FROM document_chunks WHERE document_id = $1 RETURNING id")
                .bind(document_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(query_err)?;

        Ok(ids.into_iter().map(ChunkId::from_uuid).collect())
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::QueryFailed(e.to_string())
}
