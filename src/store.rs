//! Persisted task source.
//!
//! Task descriptors live in the app's own storage; the core only reads them
//! at startup to re-arm enabled schedules.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::task::TaskDescriptor;

/// A persisted task and whether its schedule is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTask {
    #[serde(flatten)]
    pub descriptor: TaskDescriptor,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Where task descriptors come from at startup.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn load_tasks(&self) -> Result<Vec<StoredTask>, StoreError>;
}

/// Reads a JSON array of stored tasks from disk.
pub struct JsonFileTaskSource {
    path: PathBuf,
}

impl JsonFileTaskSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TaskSource for JsonFileTaskSource {
    async fn load_tasks(&self) -> Result<Vec<StoredTask>, StoreError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No task store file; nothing to load");
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let tasks: Vec<StoredTask> = serde_json::from_str(&content)?;
        tracing::debug!(path = %self.path.display(), count = tasks.len(), "Loaded stored tasks");
        Ok(tasks)
    }
}

#[async_trait]
impl TaskSource for Vec<StoredTask> {
    async fn load_tasks(&self) -> Result<Vec<StoredTask>, StoreError> {
        Ok(self.clone())
    }
}
