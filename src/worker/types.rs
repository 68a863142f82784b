use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::{error::ServiceError, modes::AspectRatio, parser::PromptVariant};

/// One image to generate. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTask {
    pub aspect_ratio: AspectRatio,
    pub prompt: String,
    pub category: String,
}

impl GenerationTask {
    pub fn from_variant(aspect_ratio: AspectRatio, variant: &PromptVariant) -> Self {
        Self {
            aspect_ratio,
            prompt: variant.prompt.clone(),
            category: variant.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    Stored,
    /// The artifact exists on the worker's disk but the upload did not happen.
    StoredLocalOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    /// Storage key when stored, local path otherwise.
    pub storage_locator: String,
    pub status: StorageStatus,
    pub local_path: PathBuf,
}

impl GenerationResult {
    pub fn stored(key: String, local_path: PathBuf) -> Self {
        Self {
            storage_locator: key,
            status: StorageStatus::Stored,
            local_path,
        }
    }

    pub fn local_only(local_path: PathBuf) -> Self {
        Self {
            storage_locator: local_path.display().to_string(),
            status: StorageStatus::StoredLocalOnly,
            local_path,
        }
    }
}

/// A started, model-loaded generation worker. Calls arrive one at a time.
#[async_trait]
pub trait Worker: Send {
    async fn generate(&mut self, task: &GenerationTask) -> Result<GenerationResult, ServiceError>;
}

/// Performs the expensive start-up of a [`Worker`].
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn start(&self) -> Result<Box<dyn Worker>, ServiceError>;
}
