use crate::domain::{FailureKind, StageFailure};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("collection creation failed: {0}")]
    CollectionCreationFailed(String),
    #[error("upsert failed: {0}")]
    UpsertFailed(String),
    #[error("search failed: {0}")]
    SearchFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<VectorStoreError> for StageFailure {
    fn from(e: VectorStoreError) -> Self {
        let kind = match &e {
            VectorStoreError::QuotaExceeded(_) => FailureKind::ResourceExhausted,
            VectorStoreError::DimensionMismatch { .. } => FailureKind::Malformed,
            _ => FailureKind::Transient,
        };
        StageFailure {
            kind,
            message: e.to_string(),
            retry_after: None,
        }
    }
}
