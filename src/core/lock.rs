//! Single-writer run lock.
//!
//! Only one process may advance the checkpoint at a time. The lock is an
//! exclusive advisory lock on `{home}/run.lock`, held for the lifetime of
//! [`RunLock`] and released when it is dropped (or the process dies).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use fs2::FileExt;

#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Take the lock without waiting; fails if another run holds it
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "Another feedscribe run holds {} (wait for it to finish)",
                path.display()
            )
        })?;

        // Holder's pid, for whoever finds the lock taken
        file.set_len(0).context("Failed to truncate lock file")?;
        writeln!(file, "{}", std::process::id()).context("Failed to write lock file")?;

        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
