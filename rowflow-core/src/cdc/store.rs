//! Watermark persistence.

use crate::cdc::types::Watermark;
use crate::error::CdcError;
use crate::persistence::{atomic_write_json, load_json, remove_if_exists};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Storage for per-source watermarks.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self, data_source_id: &str) -> Result<Option<Watermark>, CdcError>;

    async fn save(&self, watermark: &Watermark) -> Result<(), CdcError>;

    /// Remove a watermark, returning whether one existed.
    async fn delete(&self, data_source_id: &str) -> Result<bool, CdcError>;
}

/// Process-local store, mainly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    watermarks: Mutex<HashMap<String, Watermark>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn load(&self, data_source_id: &str) -> Result<Option<Watermark>, CdcError> {
        Ok(self.watermarks.lock().await.get(data_source_id).cloned())
    }

    async fn save(&self, watermark: &Watermark) -> Result<(), CdcError> {
        self.watermarks
            .lock()
            .await
            .insert(watermark.data_source_id.clone(), watermark.clone());
        Ok(())
    }

    async fn delete(&self, data_source_id: &str) -> Result<bool, CdcError> {
        Ok(self.watermarks.lock().await.remove(data_source_id).is_some())
    }
}

/// One JSON file per data source under a directory.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    dir: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a source id: a readable prefix (characters outside
    /// `[A-Za-z0-9._-]` become `_`) followed by a digest of the raw id, so
    /// ids that sanitize alike, or differ only in case, get distinct files.
    pub fn path_for(&self, data_source_id: &str) -> PathBuf {
        let prefix: String = data_source_id
            .chars()
            .take(MAX_PREFIX_CHARS)
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = format!("{:x}", Sha256::digest(data_source_id.as_bytes()));
        self.dir
            .join(format!("{prefix}-{}.json", &digest[..DIGEST_CHARS]))
    }
}

const MAX_PREFIX_CHARS: usize = 64;
const DIGEST_CHARS: usize = 16;

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self, data_source_id: &str) -> Result<Option<Watermark>, CdcError> {
        let path = self.path_for(data_source_id);
        let stored: Option<Watermark> = load_json(&path)
            .await
            .map_err(|e| CdcError::store(format!("failed to read {}: {e}", path.display())))?;
        match stored {
            Some(w) if w.data_source_id != data_source_id => Err(CdcError::store(format!(
                "{} holds the watermark of '{}', not '{data_source_id}'",
                path.display(),
                w.data_source_id
            ))),
            other => Ok(other),
        }
    }

    async fn save(&self, watermark: &Watermark) -> Result<(), CdcError> {
        let path = self.path_for(&watermark.data_source_id);
        atomic_write_json(&path, watermark)
            .await
            .map_err(|e| CdcError::store(format!("failed to write {}: {e}", path.display())))
    }

    async fn delete(&self, data_source_id: &str) -> Result<bool, CdcError> {
        let path = self.path_for(data_source_id);
        remove_if_exists(&path)
            .await
            .map_err(|e| CdcError::store(format!("failed to remove {}: {e}", path.display())))
    }
}
