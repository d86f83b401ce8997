use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};

use crate::application::ports::{BlobStore, BlobStoreError};
use crate::domain::StoragePath;

/// Filesystem-backed staging store rooted at a base directory.
pub struct LocalBlobStore {
    inner: Arc<LocalFileSystem>,
}

impl LocalBlobStore {
    pub fn new(base_path: PathBuf) -> Result<Self, BlobStoreError> {
        std::fs::create_dir_all(&base_path).map_err(BlobStoreError::Io)?;
        let fs = LocalFileSystem::new_with_prefix(base_path)
            .map_err(|e| BlobStoreError::UploadFailed(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(fs),
        })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &StoragePath, data: Bytes) -> Result<(), BlobStoreError> {
        let store_path = StorePath::from(path.as_str());
        self.inner
            .put(&store_path, PutPayload::from(data))
            .await
            .map_err(|e| BlobStoreError::UploadFailed(e.to_string()))?;
        Ok(())
    }

    async fn fetch(&self, path: &StoragePath) -> Result<Vec<u8>, BlobStoreError> {
        let store_path = StorePath::from(path.as_str());
        let result = self
            .inner
            .get(&store_path)
            .await
            .map_err(|e| BlobStoreError::NotFound(e.to_string()))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| BlobStoreError::DownloadFailed(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    async fn delete(&self, path: &StoragePath) -> Result<(), BlobStoreError> {
        let store_path = StorePath::from(path.as_str());
        self.inner
            .delete(&store_path)
            .await
            .map_err(|e| BlobStoreError::DeleteFailed(e.to_string()))
    }
}
