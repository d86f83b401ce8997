use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Embedding, FailureKind, StageFailure};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedderError>;
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbedderError>;
    /// Fixed output dimension; upserted vectors must match.
    fn dimensions(&self) -> usize;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("embedding api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("embedding request timed out")]
    Timeout,
    #[error("embedding rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("embedding quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl From<EmbedderError> for StageFailure {
    fn from(e: EmbedderError) -> Self {
        let (kind, retry_after) = match &e {
            EmbedderError::ApiRequestFailed(_) | EmbedderError::Timeout => {
                (FailureKind::Transient, None)
            }
            EmbedderError::RateLimited { retry_after } => (FailureKind::Transient, *retry_after),
            EmbedderError::QuotaExhausted(_) => (FailureKind::ResourceExhausted, None),
            EmbedderError::InvalidResponse(_) => (FailureKind::Malformed, None),
        };
        StageFailure {
            kind,
            message: e.to_string(),
            retry_after,
        }
    }
}
