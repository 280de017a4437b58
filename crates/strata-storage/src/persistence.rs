use std::collections::BTreeMap;
use std::path::PathBuf;

use aws_sdk_s3::Client as S3Client;
use serde::{Deserialize, Serialize};
use strata_core::{ResourceId, ResourceState};

use crate::error::StorageError;
use crate::objects;

/// On-disk shape of the state store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub format_version: u32,
    pub resources: BTreeMap<ResourceId, ResourceState>,
}

impl StateSnapshot {
    pub const FORMAT_VERSION: u32 = 1;

    pub fn new(resources: BTreeMap<ResourceId, ResourceState>) -> Self {
        Self {
            format_version: Self::FORMAT_VERSION,
            resources,
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let snapshot: StateSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.format_version > Self::FORMAT_VERSION {
            return Err(StorageError::UnsupportedFormat {
                found: snapshot.format_version,
                supported: Self::FORMAT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

/// Where the S3 copy of the state lives.
pub struct S3Mirror {
    pub client: S3Client,
    pub bucket: String,
    pub key: String,
}

/// Dual-write state persistence: local disk (safety net) + S3 (authoritative
/// when configured). Either side may be absent; with neither, the store is
/// purely in-memory.
#[derive(Default)]
pub struct StatePersistence {
    local_path: Option<PathBuf>,
    s3: Option<S3Mirror>,
}

impl StatePersistence {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: Some(path.into()),
            s3: None,
        }
    }

    pub fn with_s3(mut self, mirror: S3Mirror) -> Self {
        self.s3 = Some(mirror);
        self
    }

    pub fn is_durable(&self) -> bool {
        self.local_path.is_some() || self.s3.is_some()
    }

    /// Write the snapshot to local disk first (tmp + rename), then upload it.
    ///
    /// A failed upload is logged, not returned: the local copy already holds
    /// the state and the next successful flush brings S3 back in line.
    pub async fn flush(&self, snapshot: &StateSnapshot) -> Result<(), StorageError> {
        if !self.is_durable() {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(snapshot)?;

        if let Some(path) = &self.local_path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp_path = path.with_extension("json.tmp");
            tokio::fs::write(&tmp_path, &json).await?;
            tokio::fs::rename(&tmp_path, path).await?;
            tracing::debug!(path = %path.display(), "state flushed to local disk");
        }

        if let Some(mirror) = &self.s3 {
            match objects::put_json(&mirror.client, &mirror.bucket, &mirror.key, json).await {
                Ok(()) => {
                    tracing::debug!(bucket = %mirror.bucket, key = %mirror.key, "state flushed to S3");
                }
                Err(e) if self.local_path.is_some() => {
                    tracing::warn!(error = %e, "failed to upload state to S3 (local copy is safe)");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Load state: S3 first, then local disk, then an empty snapshot.
    pub async fn load(&self) -> Result<StateSnapshot, StorageError> {
        if let Some(mirror) = &self.s3 {
            match objects::get_object(&mirror.client, &mirror.bucket, &mirror.key).await {
                Ok(bytes) => {
                    tracing::debug!(bucket = %mirror.bucket, key = %mirror.key, "state loaded from S3");
                    return StateSnapshot::decode(&bytes);
                }
                Err(StorageError::NotFound { .. }) => {
                    tracing::debug!("no state in S3, trying local");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load state from S3, trying local");
                }
            }
        }

        if let Some(path) = &self.local_path {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    tracing::debug!(path = %path.display(), "state loaded from local disk");
                    return StateSnapshot::decode(&bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!("no existing state found, starting fresh");
        Ok(StateSnapshot::new(BTreeMap::new()))
    }
}
