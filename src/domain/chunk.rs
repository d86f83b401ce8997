use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::document::DocumentId;
use super::embedding::Embedding;

/// Where a chunk's text came from in the combined text stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub page: Option<u32>,
    pub start: usize,
    pub end: usize,
}

/// An append-only segment of a document's combined text. The id is derived
/// from the document content hash and the window, so re-chunking unchanged
/// content always reproduces the same rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub ordinal: u32,
    pub text: String,
    pub embedding: Option<Embedding>,
    pub span: SourceSpan,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn new(
        document_id: DocumentId,
        content_hash: &str,
        ordinal: u32,
        text: String,
        span: SourceSpan,
    ) -> Self {
        Self {
            id: ChunkId::derive(content_hash, ordinal, span.start, span.end),
            document_id,
            ordinal,
            text,
            embedding: None,
            span,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(Uuid);

impl ChunkId {
    /// Content-addressed id: truncated SHA-256 over the document content hash
    /// and the window identity. Deterministic across re-runs.
    pub fn derive(content_hash: &str, ordinal: u32, start: usize, end: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content_hash.as_bytes());
        hasher.update(ordinal.to_be_bytes());
        hasher.update((start as u64).to_be_bytes());
        hasher.update((end as u64).to_be_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_same_window_when_deriving_chunk_id_then_id_is_stable() {
        let a = ChunkId::derive("abc123", 0, 0, 1000);
        let b = ChunkId::derive("abc123", 0, 0, 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn given_different_ordinal_when_deriving_chunk_id_then_id_differs() {
        let a = ChunkId::derive("abc123", 0, 0, 1000);
        let b = ChunkId::derive("abc123", 1, 0, 1000);
        assert_ne!(a, b);
    }

    #[test]
    fn given_different_content_hash_when_deriving_chunk_id_then_id_differs() {
        let a = ChunkId::derive("abc123", 0, 0, 1000);
        let b = ChunkId::derive("abc124", 0, 0, 1000);
        assert_ne!(a, b);
    }
}
