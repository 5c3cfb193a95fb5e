//! Checkpoint: the GUID of the most recently fully processed episode.
//!
//! Reads degrade to "no checkpoint" on any failure so a broken store
//! means reprocessing from the start of the feed, never a crash. Writes
//! propagate every failure: a silently lost checkpoint causes duplicate
//! processing on the next run.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{ObjectStore, StorageError};

pub const DEFAULT_CHECKPOINT_KEY: &str = "checkpoint";

pub struct CheckpointStore {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the checkpoint, trimmed; `None` when absent, empty or unreadable
    pub async fn get(&self) -> Option<String> {
        let bytes = match self.store.get(&self.key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to read checkpoint");
                return None;
            }
        };

        let value = match String::from_utf8(bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Checkpoint is not valid UTF-8, ignoring");
                return None;
            }
        };

        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Replace the checkpoint with `guid` (trimmed)
    pub async fn set(&self, guid: &str) -> Result<(), StorageError> {
        let guid = guid.trim();
        if guid.is_empty() {
            return Err(StorageError::InvalidValue {
                key: self.key.clone(),
                reason: "checkpoint GUID is empty".to_string(),
            });
        }

        self.store
            .put(&self.key, guid.as_bytes().to_vec())
            .await
            .map_err(|e| {
                error!(key = %self.key, error = %e, "Failed to save checkpoint");
                e
            })?;

        info!(checkpoint = guid, "Updated checkpoint");
        Ok(())
    }

    /// Remove the checkpoint, so the next run starts from the oldest episode
    pub async fn clear(&self) -> Result<bool, StorageError> {
        self.store.delete(&self.key).await
    }
}
