//! Transcript artifacts produced by the pipeline.
//!
//! The raw transcript is the expensive output of speech-to-text and is the
//! only intermediate result that gets cached between runs.

use serde::{Deserialize, Serialize};

/// Structured speech-to-text output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTranscript {
    /// Concatenated text of all chunks
    pub text: String,

    /// Time-coded spans in model output order
    pub chunks: Vec<TranscriptChunk>,
}

/// One recognized utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub text: String,

    /// `(start, end)` in seconds
    pub timestamp: (f64, f64),
}

impl TranscriptChunk {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            timestamp: (start, end),
        }
    }

    pub fn start(&self) -> f64 {
        self.timestamp.0
    }

    pub fn end(&self) -> f64 {
        self.timestamp.1
    }
}

impl RawTranscript {
    /// Build a transcript from chunks, joining their text with spaces
    pub fn from_chunks(chunks: Vec<TranscriptChunk>) -> Self {
        let text = chunks
            .iter()
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self { text, chunks }
    }

    /// End of the last chunk, in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.chunks.iter().map(|c| c.end()).fold(0.0, f64::max)
    }
}

/// Everything produced for one episode by a successful pipeline run
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub raw_transcript: RawTranscript,

    /// Normalized and filtered transcript text
    pub converted_transcript: String,

    pub summary: String,

    /// Whether the raw transcript came from the stage cache
    pub from_cache: bool,
}
