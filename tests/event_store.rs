//! Event Store Integration Tests
//!
//! Tests for journal format, append operations, replay order and run
//! reconstruction.

use feedscribe::core::{generate_idempotency_key, hash_input, EventStore};
use feedscribe::domain::{Event, EventType, ItemState, RunState, Stage, StageStatus};
use tempfile::TempDir;
use uuid::Uuid;

fn event(run_id: Uuid, event_type: EventType, status: StageStatus) -> Event {
    Event::new(
        run_id,
        event_type,
        format!("{}:test", run_id),
        format!("{:?}", event_type),
        status,
    )
}

#[tokio::test]
async fn test_event_append_format() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = EventStore::open_in(temp.path(), run_id).await.unwrap();

    let started = Event::new(
        run_id,
        EventType::StageStarted,
        generate_idempotency_key("guid-1", "summarize"),
        "Stage 'summarize' attempt 1".to_string(),
        StageStatus::Running,
    )
    .for_episode("guid-1")
    .for_stage(Stage::Summarize);
    store.append(&started).await.unwrap();

    // One JSON object per line
    let content = std::fs::read_to_string(store.events_path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);

    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["run_id"], run_id.to_string());
    assert_eq!(value["event_type"], "stage_started");
    assert_eq!(value["stage"], "summarize");
    assert_eq!(value["guid"], "guid-1");
    assert_eq!(value["status"], "running");

    // Timestamp is ISO 8601
    assert!(value["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_replay_preserves_order() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = EventStore::open_in(temp.path(), run_id).await.unwrap();

    let types = [
        EventType::RunStarted,
        EventType::ItemStarted,
        EventType::StageStarted,
        EventType::StageCompleted,
        EventType::ItemCompleted,
        EventType::RunCompleted,
    ];
    for event_type in types {
        store
            .append(&event(run_id, event_type, StageStatus::Running))
            .await
            .unwrap();
    }

    let replayed: Vec<EventType> = store
        .replay()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(replayed, types.to_vec());
}

#[tokio::test]
async fn test_reopened_store_appends() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();

    let first = EventStore::open_in(temp.path(), run_id).await.unwrap();
    first
        .append(&event(run_id, EventType::RunStarted, StageStatus::Running))
        .await
        .unwrap();

    let second = EventStore::open_in(temp.path(), run_id).await.unwrap();
    second
        .append(&event(run_id, EventType::RunCompleted, StageStatus::Completed))
        .await
        .unwrap();

    assert_eq!(first.replay().await.unwrap().len(), 2);
    let run = second.load_run().await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn test_run_reconstruction_from_journal() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = EventStore::open_in(temp.path(), run_id).await.unwrap();

    let events = vec![
        event(run_id, EventType::RunStarted, StageStatus::Running),
        event(run_id, EventType::ItemStarted, StageStatus::Running).for_episode("a"),
        event(run_id, EventType::StageStarted, StageStatus::Running)
            .for_episode("a")
            .for_stage(Stage::Fetch),
        event(run_id, EventType::StageRetrying, StageStatus::Running)
            .for_episode("a")
            .for_stage(Stage::Fetch)
            .with_error("connection reset".to_string()),
        event(run_id, EventType::StageFailed, StageStatus::Failed)
            .for_episode("a")
            .for_stage(Stage::Fetch)
            .with_duration(1200)
            .with_error("connection reset".to_string()),
        event(run_id, EventType::ItemFailed, StageStatus::Failed).for_episode("a"),
        event(run_id, EventType::RunFailed, StageStatus::Failed)
            .with_error("fetch stage failed: connection reset".to_string()),
    ];
    for e in &events {
        store.append(e).await.unwrap();
    }

    let run = store.load_run().await.unwrap().unwrap();
    assert_eq!(run.id, run_id);
    assert_eq!(
        run.state,
        RunState::Failed {
            error: "fetch stage failed: connection reset".to_string()
        }
    );
    assert_eq!(run.current_item.as_deref(), Some("a"));
    assert_eq!(run.item_state, ItemState::Failed);
    assert_eq!(run.stage_status(Stage::Fetch), StageStatus::Failed);
    assert!(run.completed_items.is_empty());

    let failed = store
        .last_event_of_type(EventType::StageFailed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.duration_ms, Some(1200));
}

#[tokio::test]
async fn test_corrupt_journal_line_is_an_error() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = EventStore::open_in(temp.path(), run_id).await.unwrap();
    std::fs::write(store.events_path(), "{not json}\n").unwrap();

    assert!(store.replay().await.is_err());
}

#[tokio::test]
async fn test_event_types_serialization() {
    let event_types = vec![
        EventType::RunStarted,
        EventType::RunCompleted,
        EventType::RunFailed,
        EventType::ItemStarted,
        EventType::ItemCompleted,
        EventType::ItemFailed,
        EventType::StageStarted,
        EventType::StageSkipped,
        EventType::StageCompleted,
        EventType::StageRetrying,
        EventType::StageFailed,
        EventType::CheckpointAdvanced,
    ];

    for event_type in event_types {
        let json = serde_json::to_string(&event_type).unwrap();
        let parsed: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event_type);
    }
}

#[test]
fn test_idempotency_keys_distinguish_episode_and_stage() {
    let key1 = generate_idempotency_key("guid-a", "fetch");
    let key2 = generate_idempotency_key("guid-b", "fetch");
    let key3 = generate_idempotency_key("guid-a", "index");

    assert_ne!(key1, key2);
    assert_ne!(key1, key3);
    assert!(key1.ends_with(":fetch"));
}

#[test]
fn test_input_hash_special_chars() {
    let hash1 = hash_input("hello\nworld");
    let hash2 = hash_input("unicode: 日本語");
    let hash3 = hash_input("");

    assert_eq!(hash1.len(), 16);
    assert_eq!(hash2.len(), 16);
    assert_eq!(hash3.len(), 16);

    assert_ne!(hash1, hash2);
    assert_ne!(hash1, hash3);
}
