//! Durable object storage and the state kept in it.
//!
//! Everything that must survive a crash goes through an [`ObjectStore`]:
//!
//! | Key | Owner | Contents |
//! |-----|-------|----------|
//! | `checkpoint` | [`CheckpointStore`] | last fully processed GUID (plain text) |
//! | `rawcache/{guid}.json` | [`StageCache`] | raw transcript |
//! | `transcripts/{slug}.json` | orchestrator | raw transcript copy |
//! | `transcripts/{slug}-converted.txt` | orchestrator | filtered transcript |
//! | `episodes/{slug}.json` | orchestrator | episode + summary |

pub mod cache;
pub mod checkpoint;
pub mod fs;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use cache::StageCache;
pub use checkpoint::CheckpointStore;
pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

/// Errors raised by object storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage backend error on {key}: {message}")]
    Backend { key: String, message: String },
}

impl StorageError {
    pub fn io(key: &str, source: std::io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Blob storage addressed by `/`-separated string keys.
///
/// `put` replaces the whole value or fails; readers never observe a
/// partially written object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object, `None` if the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Create or replace an object
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Remove an object, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Keys of the final artifacts persisted for one episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKeys {
    pub raw_transcript: String,
    pub converted_transcript: String,
    pub episode: String,
}

impl ArtifactKeys {
    pub fn for_slug(slug: &str) -> Self {
        Self {
            raw_transcript: format!("transcripts/{}.json", slug),
            converted_transcript: format!("transcripts/{}-converted.txt", slug),
            episode: format!("episodes/{}.json", slug),
        }
    }
}

/// Validate a storage key: non-empty segments, no `.`/`..`, no backslashes
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Escape an arbitrary identifier into a single safe key segment.
///
/// ASCII alphanumerics, `-` and `_` pass through, as does `.` anywhere but
/// the first position; every other byte becomes `%XX`. The mapping is
/// injective so distinct GUIDs never share a cache entry.
pub fn escape_key_segment(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for (i, byte) in raw.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && i > 0);
        if keep {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}
