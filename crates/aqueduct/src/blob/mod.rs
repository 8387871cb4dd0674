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

//! Blob store interface for large request artifacts.
//!
//! Request payloads and results never live in the relational store; records
//! and queue messages carry bucket+key pointers instead. All artifacts for
//! one request are collocated under a single prefix:
//!
//! ```text
//! {partition}/{request_id}/{stage}/{artifact}.json
//! ```
//!
//! which keeps lifecycle and audit handling per request a single prefix
//! operation.

mod filesystem;
mod memory;

pub use filesystem::FilesystemBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BlobError;
use crate::models::BlobPointer;
use crate::state::PipelineStage;

/// Capability interface for artifact storage addressed by bucket+key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` under `pointer`, overwriting any existing blob.
    async fn put(&self, pointer: &BlobPointer, data: Vec<u8>) -> Result<(), BlobError>;

    /// Reads the blob at `pointer`.
    async fn get(&self, pointer: &BlobPointer) -> Result<Vec<u8>, BlobError>;

    /// True when a blob exists at `pointer`.
    async fn exists(&self, pointer: &BlobPointer) -> Result<bool, BlobError>;
}

/// Builds the canonical artifact key for one request artifact.
pub fn artifact_key(
    partition: &str,
    request_id: Uuid,
    stage: PipelineStage,
    artifact: &str,
) -> String {
    format!("{}/{}/{}/{}.json", partition, request_id, stage.as_str(), artifact)
}

/// Builds the blob pointer for one request artifact in `bucket`.
pub fn artifact_pointer(
    bucket: &str,
    partition: &str,
    request_id: Uuid,
    stage: PipelineStage,
    artifact: &str,
) -> BlobPointer {
    BlobPointer::new(bucket, artifact_key(partition, request_id, stage, artifact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_convention() {
        let id = Uuid::new_v4();
        let key = artifact_key("tenant-a", id, PipelineStage::Intake, "payload");
        assert_eq!(key, format!("tenant-a/{}/intake/payload.json", id));
    }

    #[test]
    fn test_artifacts_share_request_prefix() {
        let id = Uuid::new_v4();
        let payload = artifact_key("t", id, PipelineStage::Intake, "payload");
        let result = artifact_key("t", id, PipelineStage::Respond, "result");
        let prefix = format!("t/{}/", id);
        assert!(payload.starts_with(&prefix));
        assert!(result.starts_with(&prefix));
    }
}
