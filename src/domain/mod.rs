//! Domain types for the feedscribe pipeline.
//!
//! This module contains the core data structures:
//! - Episode: a validated feed entry
//! - Transcript: raw and derived transcript artifacts
//! - Stage: the stage chain and per-episode state machine
//! - Events / Run: the run journal and its replayed state

pub mod episode;
pub mod events;
pub mod run;
pub mod stage;
pub mod transcript;

// Re-export commonly used types
pub use episode::{slugify_with_episode_number, Episode, EpisodeRecord};
pub use events::{Event, EventType, StageStatus};
pub use run::{Run, RunState};
pub use stage::{ItemState, Stage};
pub use transcript::{PipelineResult, RawTranscript, TranscriptChunk};
