//! Adapter interfaces for external systems.
//!
//! Every side-effecting stage talks to the outside world through one of
//! these traits, so tests can swap in fakes and the orchestrator never
//! depends on a concrete backend.

pub mod http;
pub mod openai;
pub mod sqlite_index;
pub mod whisper;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Episode, RawTranscript};
use crate::stages::{IndexDocument, PcmAudio};

pub use http::HttpFetcher;
pub use openai::OpenAiClient;
pub use sqlite_index::{SearchHit, SqliteIndex};
pub use whisper::WhisperCli;

/// Downloads an episode's media to local disk
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Fetch the enclosure, returning the path of the local copy.
    ///
    /// A failed fetch leaves no partial file behind.
    async fn fetch(&self, episode: &Episode) -> Result<PathBuf>;
}

/// Speech-to-text backend
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe mono 16 kHz float PCM into time-coded spans
    async fn transcribe(&self, audio: &PcmAudio) -> Result<RawTranscript>;
}

/// Summarization backend
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    /// Summarize a time-stamped transcript. An empty summary is an error.
    async fn summarize(&self, episode: &Episode, transcript: &str) -> Result<String>;
}

/// Text embedding backend
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// One vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Queryable store of embedded transcript chunks
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Commit documents to the index, returning how many were stored
    async fn add(&self, documents: &[IndexDocument]) -> Result<usize>;
}
