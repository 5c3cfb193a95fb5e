//! Stage cache for raw transcripts, keyed by episode GUID.
//!
//! Entries are created once after a successful transcription and are
//! never invalidated automatically; clearing them is an operator action
//! (`feedscribe cache clear`).

use std::sync::Arc;

use tracing::debug;

use super::{escape_key_segment, ObjectStore, StorageError};
use crate::domain::RawTranscript;

const CACHE_PREFIX: &str = "rawcache/";

pub struct StageCache {
    store: Arc<dyn ObjectStore>,
}

impl StageCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Storage key of the cache entry for `guid`
    pub fn key_for(guid: &str) -> String {
        format!("{}{}.json", CACHE_PREFIX, escape_key_segment(guid.trim()))
    }

    pub async fn has(&self, guid: &str) -> Result<bool, StorageError> {
        self.store.exists(&Self::key_for(guid)).await
    }

    pub async fn load(&self, guid: &str) -> Result<RawTranscript, StorageError> {
        let key = Self::key_for(guid);
        let bytes = self.store.get(&key).await?.ok_or_else(|| StorageError::Backend {
            key: key.clone(),
            message: "cache entry disappeared".to_string(),
        })?;

        serde_json::from_slice(&bytes).map_err(|source| StorageError::Serialization { key, source })
    }

    pub async fn store(&self, guid: &str, transcript: &RawTranscript) -> Result<(), StorageError> {
        let key = Self::key_for(guid);
        let bytes = serde_json::to_vec_pretty(transcript).map_err(|source| {
            StorageError::Serialization {
                key: key.clone(),
                source,
            }
        })?;

        self.store.put(&key, bytes).await?;
        debug!(%key, chunks = transcript.chunks.len(), "Cached raw transcript");
        Ok(())
    }

    /// Drop the entry for one episode, returning whether it existed
    pub async fn evict(&self, guid: &str) -> Result<bool, StorageError> {
        self.store.delete(&Self::key_for(guid)).await
    }

    /// Keys of every cache entry
    pub async fn entries(&self) -> Result<Vec<String>, StorageError> {
        self.store.list(CACHE_PREFIX).await
    }

    /// Drop every entry, returning how many were removed
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in self.entries().await? {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
