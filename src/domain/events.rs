//! Journal events recorded while a run processes the feed.
//!
//! Every state change of a run or an episode is appended to the run's
//! journal. The journal is diagnostic: durability of progress lives in the
//! checkpoint and the stage cache, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;

/// A single event in the append-only run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Episode GUID (if the event concerns an episode)
    pub guid: Option<String>,

    /// Stage (if the event concerns a stage)
    pub stage: Option<Stage>,

    /// Type of event
    pub event_type: EventType,

    /// Key format: "{guid_hash}:{stage}" for stage events
    pub idempotency_key: String,

    /// Human-readable summary (NO secrets)
    pub payload_summary: String,

    pub status: StageStatus,

    /// Time taken in milliseconds (for finished stages)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
        status: StageStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            guid: None,
            stage: None,
            event_type,
            idempotency_key,
            payload_summary,
            status,
            duration_ms: None,
            error: None,
        }
    }

    /// Attach the episode this event concerns
    pub fn for_episode(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Attach the stage this event concerns
    pub fn for_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new run has started
    RunStarted,

    /// Every pending episode was processed
    RunCompleted,

    /// The run stopped at a failed episode or a fatal feed error
    RunFailed,

    /// An episode entered the pipeline
    ItemStarted,

    /// An episode reached `Done`
    ItemCompleted,

    /// An episode reached `Failed`
    ItemFailed,

    StageStarted,

    /// Stage skipped because its output was already cached
    StageSkipped,

    StageCompleted,

    /// A stage attempt failed and will be retried
    StageRetrying,

    /// A stage failed permanently
    StageFailed,

    /// The checkpoint now points at this episode
    CheckpointAdvanced,
}

/// Status of a stage, episode, or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped (cache hit)
    Skipped,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}
