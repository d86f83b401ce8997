use std::io;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{FailureKind, StageFailure, StoragePath};

/// Staging storage for source bytes and image regions in flight between
/// Extract and Annotate.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &StoragePath, data: Bytes) -> Result<(), BlobStoreError>;

    async fn fetch(&self, path: &StoragePath) -> Result<Vec<u8>, BlobStoreError>;

    async fn delete(&self, path: &StoragePath) -> Result<(), BlobStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<BlobStoreError> for StageFailure {
    fn from(e: BlobStoreError) -> Self {
        let kind = match e {
            // A missing object can never be read on a later attempt.
            BlobStoreError::NotFound(_) => FailureKind::Malformed,
            _ => FailureKind::Transient,
        };
        StageFailure {
            kind,
            message: e.to_string(),
            retry_after: None,
        }
    }
}
