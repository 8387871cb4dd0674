/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! In-memory blob store for tests and single-process deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::BlobError;
use crate::models::BlobPointer;

use super::BlobStore;

/// Blob store backed by a process-local map.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, pointer: &BlobPointer, data: Vec<u8>) -> Result<(), BlobError> {
        self.blobs
            .write()
            .insert((pointer.bucket.clone(), pointer.key.clone()), data);
        Ok(())
    }

    async fn get(&self, pointer: &BlobPointer) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .get(&(pointer.bucket.clone(), pointer.key.clone()))
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                bucket: pointer.bucket.clone(),
                key: pointer.key.clone(),
            })
    }

    async fn exists(&self, pointer: &BlobPointer) -> Result<bool, BlobError> {
        Ok(self
            .blobs
            .read()
            .contains_key(&(pointer.bucket.clone(), pointer.key.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryBlobStore::new();
        let pointer = BlobPointer::new("bucket", "a/b/c.json");

        store.put(&pointer, b"{\"x\":1}".to_vec()).await.unwrap();
        assert!(store.exists(&pointer).await.unwrap());
        assert_eq!(store.get(&pointer).await.unwrap(), b"{\"x\":1}");
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let store = MemoryBlobStore::new();
        let pointer = BlobPointer::new("bucket", "missing");
        assert!(!store.exists(&pointer).await.unwrap());
        assert!(matches!(
            store.get(&pointer).await,
            Err(BlobError::NotFound { .. })
        ));
    }
}
