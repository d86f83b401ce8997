use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::application::ports::{BlobStore, BlobStoreError};
use crate::domain::StoragePath;

/// Map-backed staging store for tests and local runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &StoragePath, data: Bytes) -> Result<(), BlobStoreError> {
        let mut objects = self.objects.lock().await;
        objects.insert(path.as_str().to_string(), data);
        Ok(())
    }

    async fn fetch(&self, path: &StoragePath) -> Result<Vec<u8>, BlobStoreError> {
        let objects = self.objects.lock().await;
        objects
            .get(path.as_str())
            .map(|b| b.to_vec())
            .ok_or_else(|| BlobStoreError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &StoragePath) -> Result<(), BlobStoreError> {
        let mut objects = self.objects.lock().await;
        objects.remove(path.as_str());
        Ok(())
    }
}
