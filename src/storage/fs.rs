//! Filesystem-backed object store.
//!
//! Keys map to paths under a root directory. Writes go to a temp file in
//! the destination directory and are renamed into place, so a crash leaves
//! either the old object or the new one.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{validate_key, ObjectStore, StorageError};

/// Prefix of in-flight temp files, never listed as keys
const TEMP_PREFIX: &str = ".tmp";

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, s| p.join(s)))
    }
}

/// Write `value` to `path` atomically (temp file + fsync + rename)
fn write_atomic(path: &Path, value: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;
    temp.write_all(value)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let size = value.len();

        tokio::task::spawn_blocking(move || write_atomic(&path, &value))
            .await
            .map_err(|e| StorageError::Backend {
                key: key.to_string(),
                message: format!("write task failed: {}", e),
            })?
            .map_err(|e| StorageError::io(key, e))?;

        debug!(key, size, "Stored object");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();

        if !self.root.exists() {
            return Ok(keys);
        }

        // Depth-first walk, carrying the key prefix of each directory
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, dir_key)) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::io(&dir_key, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(&dir_key, e))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if name.starts_with(TEMP_PREFIX) {
                    continue;
                }

                let key = if dir_key.is_empty() {
                    name
                } else {
                    format!("{}/{}", dir_key, name)
                };

                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::io(&key, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
