//! Stage results, retry policy and per-stage timeouts.
//!
//! Every stage produces `Result<T, StageError>`. There is no "empty
//! success": a stage that has nothing to return fails.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::domain::Stage;

/// A failed stage, tagged with the stage that failed
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub error: anyhow::Error,
}

impl StageError {
    pub fn new(stage: Stage, error: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {:#}", self.stage, self.error)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// Result of one stage
pub type StageResult<T> = Result<T, StageError>;

/// Retry policy for network-bound stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Upper bound on each external call
#[derive(Debug, Clone, PartialEq)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub transcribe: Duration,
    pub summarize: Duration,
    pub index: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(600),
            transcribe: Duration::from_secs(7200),
            summarize: Duration::from_secs(300),
            index: Duration::from_secs(300),
        }
    }
}

impl StageTimeouts {
    /// Timeout for a stage that calls out, `None` for pure stages
    pub fn for_stage(&self, stage: Stage) -> Option<Duration> {
        match stage {
            Stage::Fetch => Some(self.fetch),
            Stage::Transcribe => Some(self.transcribe),
            Stage::Summarize => Some(self.summarize),
            Stage::Index => Some(self.index),
            Stage::Normalize | Stage::Filter | Stage::Persist => None,
        }
    }
}

/// Knobs the orchestrator needs, derived from [`Config`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub timeouts: StageTimeouts,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Decoder used for non-WAV media
    pub ffmpeg: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeouts: StageTimeouts::default(),
            chunk_size: crate::stages::index::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::stages::index::DEFAULT_CHUNK_OVERLAP,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.clone(),
            timeouts: StageTimeouts {
                fetch: Duration::from_secs(config.feed.download_timeout_seconds),
                transcribe: Duration::from_secs(config.transcription.timeout_seconds),
                summarize: Duration::from_secs(config.summary.timeout_seconds),
                index: Duration::from_secs(config.index.timeout_seconds),
            },
            chunk_size: config.index.chunk_size,
            chunk_overlap: config.index.chunk_overlap,
            ffmpeg: config.transcription.ffmpeg.clone(),
        }
    }
}
