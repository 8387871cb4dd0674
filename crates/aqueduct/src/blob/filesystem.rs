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

//! Filesystem-backed blob store.
//!
//! Buckets map to directories under a root path; keys map to file paths
//! inside the bucket directory. Suitable for single-node deployments where
//! an object store is not available.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::BlobError;
use crate::models::BlobPointer;

use super::BlobStore;

/// Blob store rooted at a local directory.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, pointer: &BlobPointer) -> PathBuf {
        self.root.join(&pointer.bucket).join(&pointer.key)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, pointer: &BlobPointer, data: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(pointer);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn get(&self, pointer: &BlobPointer) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(pointer);
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound {
                bucket: pointer.bucket.clone(),
                key: pointer.key.clone(),
            }),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn exists(&self, pointer: &BlobPointer) -> Result<bool, BlobError> {
        Ok(Path::exists(&self.path_for(pointer)))
    }
}
