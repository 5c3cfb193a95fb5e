//! Run state and reconstruction from journal events.
//!
//! A Run is one traversal of the feed, from the checkpoint forward, until
//! the feed is exhausted or an episode fails.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StageStatus};
use super::stage::{ItemState, Stage};

/// A single feed traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// GUIDs of episodes fully processed by this run, in order
    pub completed_items: Vec<String>,

    /// Last checkpoint value written by this run
    pub checkpoint: Option<String>,

    /// Episode currently (or last) in the pipeline
    pub current_item: Option<String>,

    /// State of `current_item`
    pub item_state: ItemState,

    /// Status of each stage for `current_item`
    pub stage_statuses: HashMap<Stage, StageStatus>,
}

impl Run {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            completed_items: Vec::new(),
            checkpoint: None,
            current_item: None,
            item_state: ItemState::Pending,
            stage_statuses: HashMap::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self::new(first_event.run_id);
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::ItemStarted => {
                self.current_item = event.guid.clone();
                self.item_state = ItemState::Pending;
                self.stage_statuses.clear();
            }
            EventType::ItemCompleted => {
                self.item_state = ItemState::Done;
                if let Some(ref guid) = event.guid {
                    self.completed_items.push(guid.clone());
                }
            }
            EventType::ItemFailed => {
                self.item_state = ItemState::Failed;
            }
            EventType::StageStarted | EventType::StageRetrying => {
                if let Some(stage) = event.stage {
                    self.item_state = stage.state();
                    self.stage_statuses.insert(stage, StageStatus::Running);
                }
            }
            EventType::StageSkipped => {
                if let Some(stage) = event.stage {
                    self.stage_statuses.insert(stage, StageStatus::Skipped);
                }
            }
            EventType::StageCompleted => {
                if let Some(stage) = event.stage {
                    self.stage_statuses.insert(stage, StageStatus::Completed);
                }
            }
            EventType::StageFailed => {
                if let Some(stage) = event.stage {
                    self.stage_statuses.insert(stage, StageStatus::Failed);
                }
            }
            EventType::CheckpointAdvanced => {
                self.checkpoint = event.guid.clone();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, RunState::Failed { .. })
    }

    /// Status of a stage for the current episode
    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.stage_statuses
            .get(&stage)
            .copied()
            .unwrap_or_default()
    }
}

/// State of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    Running,

    /// Feed exhausted, every episode processed
    Completed,

    /// Stopped at a failure; the checkpoint was not advanced past it
    Failed { error: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(run_id: Uuid, event_type: EventType, status: StageStatus) -> Event {
        Event::new(run_id, event_type, String::new(), String::new(), status)
    }

    #[test]
    fn test_run_creation() {
        let run_id = Uuid::new_v4();
        let run = Run::new(run_id);

        assert_eq!(run.id, run_id);
        assert!(run.is_running());
        assert!(run.completed_items.is_empty());
    }

    #[test]
    fn test_run_from_events() {
        let run_id = Uuid::new_v4();

        let events = vec![
            event(run_id, EventType::RunStarted, StageStatus::Running),
            event(run_id, EventType::ItemStarted, StageStatus::Running).for_episode("a"),
            event(run_id, EventType::StageSkipped, StageStatus::Skipped)
                .for_episode("a")
                .for_stage(Stage::Transcribe),
            event(run_id, EventType::StageCompleted, StageStatus::Completed)
                .for_episode("a")
                .for_stage(Stage::Summarize),
            event(run_id, EventType::CheckpointAdvanced, StageStatus::Completed)
                .for_episode("a"),
            event(run_id, EventType::ItemCompleted, StageStatus::Completed).for_episode("a"),
            event(run_id, EventType::ItemStarted, StageStatus::Running).for_episode("b"),
            event(run_id, EventType::StageStarted, StageStatus::Running)
                .for_episode("b")
                .for_stage(Stage::Summarize),
            event(run_id, EventType::StageFailed, StageStatus::Failed)
                .for_episode("b")
                .for_stage(Stage::Summarize),
            event(run_id, EventType::ItemFailed, StageStatus::Failed).for_episode("b"),
            event(run_id, EventType::RunFailed, StageStatus::Failed)
                .with_error("summarize stage failed".to_string()),
        ];

        let run = Run::from_events(&events).unwrap();

        assert!(run.is_failed());
        assert_eq!(run.completed_items, vec!["a".to_string()]);
        assert_eq!(run.checkpoint.as_deref(), Some("a"));
        assert_eq!(run.current_item.as_deref(), Some("b"));
        assert_eq!(run.item_state, ItemState::Failed);
        assert_eq!(run.stage_status(Stage::Summarize), StageStatus::Failed);
        assert_eq!(run.stage_status(Stage::Fetch), StageStatus::Pending);
    }

    #[test]
    fn test_empty_events() {
        assert!(Run::from_events(&[]).is_none());
    }
}
