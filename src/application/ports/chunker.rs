use async_trait::async_trait;

use crate::domain::{Document, DocumentChunk, FailureKind, StageFailure};

/// Splits the combined text stream into bounded, overlapping,
/// content-addressed chunks.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(
        &self,
        text: &str,
        document: &Document,
    ) -> Result<Vec<DocumentChunk>, ChunkerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    #[error("empty document text")]
    EmptyText,
    #[error("splitting failed: {0}")]
    SplittingFailed(String),
}

impl From<ChunkerError> for StageFailure {
    fn from(e: ChunkerError) -> Self {
        StageFailure {
            kind: FailureKind::Malformed,
            message: e.to_string(),
            retry_after: None,
        }
    }
}
