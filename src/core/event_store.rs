//! Append-only run journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) under
//! `{runs_dir}/{run_id}/events.jsonl` for easy debugging/inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType, Run};

/// File-based event store using JSONL format
pub struct EventStore {
    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl EventStore {
    /// Create or open the journal of a run under `runs_dir`
    pub async fn open_in(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = runs_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self { events_path })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild the run report from its journal
    pub async fn load_run(&self) -> Result<Option<Run>> {
        Ok(Run::from_events(&self.replay().await?))
    }

    /// Find events matching a predicate
    pub async fn find_events<F>(&self, predicate: F) -> Result<Vec<Event>>
    where
        F: Fn(&Event) -> bool,
    {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(predicate).collect())
    }

    /// Get the last event of a specific type
    pub async fn last_event_of_type(&self, event_type: EventType) -> Result<Option<Event>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// List all run IDs under `runs_dir`
    pub async fn list_runs(runs_dir: &Path) -> Result<Vec<Uuid>> {
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Idempotency key of an episode's stage: `{guid_hash}:{stage}`
pub fn generate_idempotency_key(guid: &str, stage: &str) -> String {
    format!("{}:{}", hash_input(guid.trim()), stage)
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8]) // First 16 hex chars (8 bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Stage, StageStatus};
    use tempfile::TempDir;

    async fn create_test_store() -> (EventStore, Uuid, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let store = EventStore::open_in(temp_dir.path(), run_id).await.unwrap();
        (store, run_id, temp_dir)
    }

    #[tokio::test]
    async fn test_event_append_and_replay() {
        let (store, run_id, _temp) = create_test_store().await;

        let event1 = Event::new(
            run_id,
            EventType::RunStarted,
            format!("{}:run", run_id),
            "Run started".to_string(),
            StageStatus::Running,
        );

        let event2 = Event::new(
            run_id,
            EventType::StageStarted,
            generate_idempotency_key("guid-1", "fetch"),
            "Stage started".to_string(),
            StageStatus::Running,
        )
        .for_episode("guid-1")
        .for_stage(Stage::Fetch);

        store.append(&event1).await.unwrap();
        store.append(&event2).await.unwrap();

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RunStarted);
        assert_eq!(events[1].event_type, EventType::StageStarted);
        assert_eq!(events[1].stage, Some(Stage::Fetch));
        assert_eq!(events[1].guid.as_deref(), Some("guid-1"));
    }

    #[tokio::test]
    async fn test_replay_missing_journal_is_empty() {
        let (store, _, _temp) = create_test_store().await;
        assert!(store.replay().await.unwrap().is_empty());
        assert!(store.load_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs() {
        let temp = TempDir::new().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        EventStore::open_in(temp.path(), a).await.unwrap();
        EventStore::open_in(temp.path(), b).await.unwrap();
        std::fs::create_dir_all(temp.path().join("not-a-run")).unwrap();

        let mut runs = EventStore::list_runs(temp.path()).await.unwrap();
        runs.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(runs, expected);

        assert!(EventStore::list_runs(&temp.path().join("missing"))
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_idempotency_key_format() {
        let key = generate_idempotency_key("guid-1", "summarize");

        // Format: {hash16}:{stage}
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 16);
        assert_eq!(parts[1], "summarize");
        assert_eq!(key, generate_idempotency_key(" guid-1 ", "summarize"));
    }

    #[test]
    fn test_input_hash_consistency() {
        let hash1 = hash_input("test input");
        let hash2 = hash_input("test input");
        let hash3 = hash_input("different input");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16); // 8 bytes = 16 hex chars
    }
}
