//! feedscribe - Resumable podcast transcription pipeline
//!
//! Walks a podcast feed from the last checkpoint, oldest episode first,
//! and runs every new episode through a fixed chain of stages:
//! fetch, transcribe, normalize, filter, summarize, index, persist.
//!
//! # Architecture
//!
//! Progress is durable in two places only:
//! - The checkpoint: GUID of the last fully processed episode
//! - The stage cache: raw transcripts, so a rerun never transcribes twice
//!
//! A run stops at the first failed episode and never advances the
//! checkpoint past it. Every run also writes a replayable JSONL journal.
//!
//! # Modules
//!
//! - `adapters`: External backends (HTTP fetch, whisper, OpenAI, SQLite index)
//! - `core`: Orchestration (Orchestrator, EventStore, retry policy, run lock)
//! - `domain`: Data structures (Episode, RawTranscript, Stage, Event, Run)
//! - `feed`: Feed source and cursor
//! - `stages`: Pure stage logic (audio, normalize, filter, summarize, index)
//! - `storage`: Object store, checkpoint and stage cache
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process new episodes
//! feedscribe run
//!
//! # See what the next run would do
//! feedscribe pending
//!
//! # Check run status
//! feedscribe status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod feed;
pub mod stages;
pub mod storage;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use core::{Backends, Orchestrator};
pub use domain::{Episode, Event, EventType, PipelineResult, RawTranscript, Run, RunState, Stage};
pub use feed::{FeedCursor, FeedSource};
pub use storage::{CheckpointStore, ObjectStore, StageCache};
