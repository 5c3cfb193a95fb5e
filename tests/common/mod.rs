//! Shared fakes for integration tests.
//!
//! Every backend records how often it was called, and the failing ones can
//! be switched on and off between runs.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use feedscribe::adapters::{MediaFetcher, SemanticIndex, SpeechToText, Summarizer};
use feedscribe::core::{Backends, Orchestrator, PipelineSettings, RetryPolicy};
use feedscribe::domain::{Episode, RawTranscript, TranscriptChunk};
use feedscribe::feed::{FeedEntry, FeedError, FeedSource};
use feedscribe::stages::audio::encode_wav_pcm16;
use feedscribe::stages::{IndexDocument, NoiseFilter, PcmAudio};
use feedscribe::storage::{CheckpointStore, MemoryObjectStore, ObjectStore, StorageError};

pub const CHECKPOINT_KEY: &str = "checkpoint";

/// A valid feed entry published on 2024-01-{day}
pub fn entry(guid: &str, day: u32) -> FeedEntry {
    FeedEntry {
        guid: Some(guid.to_string()),
        title: Some(format!("Episode {}: Title {}", day, guid)),
        link: Some(format!("https://example.com/episodes/{}", guid)),
        audio_url: Some(format!("https://cdn.example.com/{}.mp3", guid)),
        pub_date: Some(Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()),
        summary: Some(format!("About {}", guid)),
        keywords: vec!["parenting".to_string()],
        duration: Some("00:42:00".to_string()),
    }
}

/// Newest-first feed of `C, B, A`
pub fn feed_abc() -> Vec<FeedEntry> {
    vec![entry("C", 3), entry("B", 2), entry("A", 1)]
}

/// Slug the orchestrator derives for `entry(guid, day)`
pub fn slug(guid: &str, day: u32) -> String {
    format!("episode-{:03}-title-{}", day, guid.to_lowercase())
}

pub struct FakeFeed {
    entries: Vec<FeedEntry>,
    fail: bool,
}

impl FakeFeed {
    pub fn new(entries: Vec<FeedEntry>) -> Self {
        Self {
            entries,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            entries: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch(&self) -> Result<Vec<FeedEntry>, FeedError> {
        if self.fail {
            return Err(FeedError::Status(503));
        }
        Ok(self.entries.clone())
    }
}

/// Writes a short stereo 8 kHz WAV for each episode
pub struct CountingFetcher {
    dir: PathBuf,
    calls: Mutex<Vec<String>>,
}

impl CountingFetcher {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn media_path(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{}.mp3", slug))
    }
}

#[async_trait]
impl MediaFetcher for CountingFetcher {
    fn name(&self) -> &str {
        "counting-fetcher"
    }

    async fn fetch(&self, episode: &Episode) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(episode.guid.clone());

        let samples: Vec<f32> = (0..8000).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        let audio = PcmAudio {
            samples,
            sample_rate: 8000,
            channels: 2,
        };

        std::fs::create_dir_all(&self.dir)?;
        let path = self.media_path(&episode.slug);
        std::fs::write(&path, encode_wav_pcm16(&audio))?;
        Ok(path)
    }
}

/// Returns a fixed transcript with spans out of order and a jingle in it
pub struct CountingStt {
    calls: AtomicUsize,
    formats: Mutex<Vec<(u32, u16)>>,
}

impl CountingStt {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            formats: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(sample_rate, channels)` of every buffer received
    pub fn formats(&self) -> Vec<(u32, u16)> {
        self.formats.lock().unwrap().clone()
    }
}

pub fn sample_transcript() -> RawTranscript {
    RawTranscript::from_chunks(vec![
        TranscriptChunk::new(" Today we talk about bedtime.", 65.4, 70.0),
        TranscriptChunk::new(" Welcome to Pop Culture Parenting. Hello everyone.", 0.0, 65.4),
    ])
}

#[async_trait]
impl SpeechToText for CountingStt {
    fn name(&self) -> &str {
        "counting-stt"
    }

    async fn transcribe(&self, audio: &PcmAudio) -> Result<RawTranscript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.formats
            .lock()
            .unwrap()
            .push((audio.sample_rate, audio.channels));
        Ok(sample_transcript())
    }
}

/// Summarizer that can fail permanently for one GUID, or transiently
pub struct FakeSummarizer {
    fail_for: Mutex<Option<String>>,
    transient_failures: AtomicUsize,
    calls: Mutex<Vec<String>>,
    transcripts: Mutex<Vec<String>>,
}

impl FakeSummarizer {
    pub fn new() -> Self {
        Self {
            fail_for: Mutex::new(None),
            transient_failures: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_for(&self, guid: Option<&str>) {
        *self.fail_for.lock().unwrap() = guid.map(str::to_string);
    }

    /// Fail the next `count` calls, whatever the episode
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.transcripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    fn name(&self) -> &str {
        "fake-summarizer"
    }

    async fn summarize(&self, episode: &Episode, transcript: &str) -> Result<String> {
        self.calls.lock().unwrap().push(episode.guid.clone());
        self.transcripts.lock().unwrap().push(transcript.to_string());

        if self.fail_for.lock().unwrap().as_deref() == Some(episode.guid.as_str()) {
            anyhow::bail!("summary service returned HTTP 500");
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("summary service unavailable");
        }

        Ok(format!("- **Summary of {}**: [link]({}?t=1m5s)", episode.guid, episode.link))
    }
}

/// Index that records documents, or fails when told to
pub struct RecordingIndex {
    fail: AtomicBool,
    documents: Mutex<Vec<IndexDocument>>,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            documents: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn documents(&self) -> Vec<IndexDocument> {
        self.documents.lock().unwrap().clone()
    }
}

#[async_trait]
impl SemanticIndex for RecordingIndex {
    fn name(&self) -> &str {
        "recording-index"
    }

    async fn add(&self, documents: &[IndexDocument]) -> Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("vector store unreachable");
        }
        self.documents.lock().unwrap().extend_from_slice(documents);
        Ok(documents.len())
    }
}

/// In-memory store that rejects writes under a key prefix
pub struct FailingStore {
    inner: MemoryObjectStore,
    fail_prefix: Mutex<Option<String>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            fail_prefix: Mutex::new(None),
        }
    }

    pub fn fail_writes_under(&self, prefix: Option<&str>) {
        *self.fail_prefix.lock().unwrap() = prefix.map(str::to_string);
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.keys().iter().any(|k| k == key)
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let failing = self
            .fail_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix));
        if failing {
            return Err(StorageError::Backend {
                key: key.to_string(),
                message: "disk full".to_string(),
            });
        }
        self.inner.put(key, value).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

/// Fakes wired into an orchestrator, with a temp dir for media and journals
pub struct Harness {
    pub temp: TempDir,
    pub store: Arc<FailingStore>,
    pub fetcher: Arc<CountingFetcher>,
    pub stt: Arc<CountingStt>,
    pub summarizer: Arc<FakeSummarizer>,
    pub index: Arc<RecordingIndex>,
    pub retry: RetryPolicy,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(&temp.path().join("media")));
        Self {
            store: Arc::new(FailingStore::new()),
            fetcher,
            stt: Arc::new(CountingStt::new()),
            summarizer: Arc::new(FakeSummarizer::new()),
            index: Arc::new(RecordingIndex::new()),
            retry: RetryPolicy::none(),
            temp,
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.temp.path().join("runs")
    }

    pub fn orchestrator(&self, feed: Vec<FeedEntry>) -> Orchestrator {
        self.orchestrator_with_feed(Arc::new(FakeFeed::new(feed)))
    }

    pub fn orchestrator_with_feed(&self, feed: Arc<dyn FeedSource>) -> Orchestrator {
        let backends = Backends {
            feed,
            fetcher: self.fetcher.clone(),
            stt: self.stt.clone(),
            summarizer: self.summarizer.clone(),
            index: self.index.clone(),
            filter: NoiseFilter::builtin().unwrap(),
        };

        let settings = PipelineSettings {
            retry: self.retry.clone(),
            ..Default::default()
        };

        Orchestrator::new(
            self.store.clone(),
            CHECKPOINT_KEY,
            backends,
            settings,
            self.runs_dir(),
        )
    }

    pub async fn checkpoint(&self) -> Option<String> {
        CheckpointStore::new(self.store.clone(), CHECKPOINT_KEY)
            .get()
            .await
    }

    /// Whether all three final artifacts exist for `slug`
    pub fn has_artifacts(&self, slug: &str) -> bool {
        self.store.contains(&format!("transcripts/{}.json", slug))
            && self.store.contains(&format!("transcripts/{}-converted.txt", slug))
            && self.store.contains(&format!("episodes/{}.json", slug))
    }

    /// Whether any final artifact exists for `slug`
    pub fn has_any_artifact(&self, slug: &str) -> bool {
        self.store.contains(&format!("transcripts/{}.json", slug))
            || self.store.contains(&format!("transcripts/{}-converted.txt", slug))
            || self.store.contains(&format!("episodes/{}.json", slug))
    }
}
