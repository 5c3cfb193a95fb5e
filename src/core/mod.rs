//! Core orchestration logic.
//!
//! This module contains:
//! - EventStore: append-only run journal
//! - Pipeline: stage results, retry policy and timeouts
//! - Lock: single-writer run lock
//! - Orchestrator: main execution engine

pub mod event_store;
pub mod lock;
pub mod orchestrator;
pub mod pipeline;

// Re-export commonly used types
pub use event_store::{generate_idempotency_key, hash_input, EventStore};
pub use lock::RunLock;
pub use orchestrator::{Backends, Orchestrator, RunJournal};
pub use pipeline::{PipelineSettings, RetryPolicy, StageError, StageResult, StageTimeouts};
