//! Pipeline stages and the per-episode state machine.
//!
//! An episode moves through the states in a fixed order. The only legal
//! skip is past `Fetching`/`Transcribing` when the raw transcript is cached.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One transformation step of the processing chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Download the enclosure audio
    Fetch,

    /// Speech-to-text (the expensive, cached stage)
    Transcribe,

    /// Raw transcript -> `[HH:MM:SS] text` lines
    Normalize,

    /// Boilerplate phrase removal
    Filter,

    /// Narrative summary / cheat sheet
    Summarize,

    /// Chunk and commit to the semantic index
    Index,

    /// Write final artifacts and advance the checkpoint
    Persist,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 7] = [
        Stage::Fetch,
        Stage::Transcribe,
        Stage::Normalize,
        Stage::Filter,
        Stage::Summarize,
        Stage::Index,
        Stage::Persist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transcribe => "transcribe",
            Stage::Normalize => "normalize",
            Stage::Filter => "filter",
            Stage::Summarize => "summarize",
            Stage::Index => "index",
            Stage::Persist => "persist",
        }
    }

    /// Network-bound stages are retried under the configured policy
    pub fn is_retryable(&self) -> bool {
        matches!(self, Stage::Fetch | Stage::Summarize | Stage::Index)
    }

    /// State the episode is in while this stage runs
    pub fn state(&self) -> ItemState {
        match self {
            Stage::Fetch => ItemState::Fetching,
            Stage::Transcribe => ItemState::Transcribing,
            Stage::Normalize => ItemState::Normalizing,
            Stage::Filter => ItemState::Filtering,
            Stage::Summarize => ItemState::Summarizing,
            Stage::Index => ItemState::Indexing,
            Stage::Persist => ItemState::Persisting,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of a single episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Fetching,
    Transcribing,
    Normalizing,
    Filtering,
    Summarizing,
    Indexing,
    Persisting,
    Done,
    Failed,
}

impl Default for ItemState {
    fn default() -> Self {
        Self::Pending
    }
}

impl ItemState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Done | ItemState::Failed)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    ///
    /// Forward moves go one state at a time, except that a cache hit jumps
    /// from `Pending` straight to `Normalizing`. `Failed` is reachable from
    /// any non-terminal state.
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == ItemState::Failed {
            return true;
        }

        use ItemState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Normalizing)
                | (Fetching, Transcribing)
                | (Transcribing, Normalizing)
                | (Normalizing, Filtering)
                | (Filtering, Summarizing)
                | (Summarizing, Indexing)
                | (Indexing, Persisting)
                | (Persisting, Done)
        )
    }
}
