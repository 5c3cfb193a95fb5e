//! Pipeline orchestrator.
//!
//! Drives one episode at a time through every stage, records each state
//! change in the run journal, and owns checkpoint advancement. The run loop
//! stops at the first episode that fails.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::openai::ChatSettings;
use crate::adapters::{
    HttpFetcher, MediaFetcher, OpenAiClient, SemanticIndex, SpeechToText, SqliteIndex, Summarizer,
    WhisperCli,
};
use crate::config::Config;
use crate::domain::{
    Episode, EpisodeRecord, Event, EventType, ItemState, PipelineResult, RawTranscript, Run, Stage,
    StageStatus,
};
use crate::feed::{FeedCursor, FeedSource, HttpFeedSource};
use crate::stages::{audio, build_documents, normalize, Catalogue, NoiseFilter};
use crate::storage::{ArtifactKeys, CheckpointStore, FsObjectStore, ObjectStore, StageCache};

use super::event_store::{generate_idempotency_key, EventStore};
use super::pipeline::{PipelineSettings, StageError, StageResult};

/// External systems the pipeline talks to
pub struct Backends {
    pub feed: Arc<dyn FeedSource>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub stt: Arc<dyn SpeechToText>,
    pub summarizer: Arc<dyn Summarizer>,
    pub index: Arc<dyn SemanticIndex>,
    pub filter: NoiseFilter,
}

/// Journal of one run
pub struct RunJournal {
    run_id: Uuid,
    store: EventStore,
}

impl RunJournal {
    pub async fn open(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        Ok(Self {
            run_id,
            store: EventStore::open_in(runs_dir, run_id).await?,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn events_path(&self) -> &Path {
        self.store.events_path()
    }

    async fn record(&self, event: Event) -> Result<()> {
        self.store.append(&event).await
    }

    fn event(
        &self,
        event_type: EventType,
        key: String,
        summary: String,
        status: StageStatus,
    ) -> Event {
        Event::new(self.run_id, event_type, key, summary, status)
    }
}

/// Tracks an episode through the state machine
struct ItemProgress {
    state: ItemState,
}

impl ItemProgress {
    fn new() -> Self {
        Self {
            state: ItemState::Pending,
        }
    }

    fn advance(&mut self, stage: Stage, next: ItemState) -> StageResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(StageError::new(
                stage,
                anyhow!("illegal transition {:?} -> {:?}", self.state, next),
            ));
        }
        debug!(from = ?self.state, to = ?next, "Episode state changed");
        self.state = next;
        Ok(())
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    checkpoint: CheckpointStore,
    cache: StageCache,
    backends: Backends,
    settings: PipelineSettings,
    runs_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        checkpoint_key: impl Into<String>,
        backends: Backends,
        settings: PipelineSettings,
        runs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            checkpoint: CheckpointStore::new(store.clone(), checkpoint_key),
            cache: StageCache::new(store.clone()),
            store,
            backends,
            settings,
            runs_dir: runs_dir.into(),
        }
    }

    /// Wire the production backends described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.store_root));

        let feed = HttpFeedSource::new(
            config.feed_url()?,
            Duration::from_secs(config.feed.timeout_seconds),
        )?;

        let fetcher = HttpFetcher::new(
            config.media_dir(),
            Duration::from_secs(config.feed.download_timeout_seconds),
        )?;

        let stt = WhisperCli::new(
            &config.transcription.binary,
            &config.transcription.model,
            config.transcription.language.clone(),
            Duration::from_secs(config.transcription.timeout_seconds),
        );

        let openai = Arc::new(OpenAiClient::new(
            &config.summary.api_base,
            config.api_key.clone(),
            ChatSettings {
                model: config.summary.model.clone(),
                temperature: config.summary.temperature,
                max_tokens: config.summary.max_tokens,
                hosts: config.summary.hosts.clone(),
            },
            &config.index.embedding_model,
            Duration::from_secs(config.summary.timeout_seconds),
        )?);

        let index = SqliteIndex::open(&config.index.db_path, &config.index.namespace, openai.clone())?;

        let filter = match config.filter_catalogue {
            Some(ref path) => NoiseFilter::new(&Catalogue::load(path)?)?,
            None => NoiseFilter::builtin()?,
        };

        let backends = Backends {
            feed: Arc::new(feed),
            fetcher: Arc::new(fetcher),
            stt: Arc::new(stt),
            summarizer: openai,
            index: Arc::new(index),
            filter,
        };

        Ok(Self::new(
            store,
            config.checkpoint_key.clone(),
            backends,
            PipelineSettings::from_config(config),
            config.runs_dir(),
        ))
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn cache(&self) -> &StageCache {
        &self.cache
    }

    /// Episodes the next run would process, oldest first
    pub async fn pending(&self) -> Result<Vec<Episode>> {
        let checkpoint = self.checkpoint.get().await;
        let cursor = FeedCursor::open(self.backends.feed.as_ref(), checkpoint.as_deref()).await?;
        cursor
            .collect::<Result<Vec<_>, _>>()
            .context("Feed contains an invalid episode")
    }

    /// Process new episodes until the feed is exhausted, `limit` episodes
    /// are done, or one fails.
    ///
    /// A failed episode is reported through the returned run's state, not
    /// as an `Err`. `Err` means the journal itself could not be written.
    #[instrument(skip(self))]
    pub async fn run(&self, limit: Option<usize>) -> Result<Run> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting run");

        let journal = RunJournal::open(&self.runs_dir, run_id).await?;
        journal
            .record(journal.event(
                EventType::RunStarted,
                format!("{}:start", run_id),
                "Run started".to_string(),
                StageStatus::Running,
            ))
            .await?;

        let checkpoint = self.checkpoint.get().await;
        let cursor = match FeedCursor::open(self.backends.feed.as_ref(), checkpoint.as_deref()).await {
            Ok(cursor) => cursor,
            Err(e) => return self.fail_run(&journal, e.to_string()).await,
        };

        let mut processed = 0usize;
        for next in cursor {
            if limit.is_some_and(|limit| processed >= limit) {
                info!(processed, "Reached episode limit");
                break;
            }

            let episode = match next {
                Ok(episode) => episode,
                Err(e) => return self.fail_run(&journal, e.to_string()).await,
            };

            match self.process_item(&journal, &episode).await {
                Ok(result) => {
                    processed += 1;
                    info!(
                        guid = %episode.guid,
                        slug = %episode.slug,
                        from_cache = result.from_cache,
                        "Episode processed"
                    );
                }
                Err(e) => {
                    error!(
                        guid = %episode.guid,
                        title = %episode.title,
                        stage = %e.stage,
                        error = %e,
                        "Episode failed, stopping run"
                    );
                    return self.fail_run(&journal, e.to_string()).await;
                }
            }
        }

        info!(processed, "Run completed successfully");
        journal
            .record(journal.event(
                EventType::RunCompleted,
                format!("{}:complete", run_id),
                format!("Run completed, {} episode(s) processed", processed),
                StageStatus::Completed,
            ))
            .await?;

        Self::load_report(&journal).await
    }

    async fn fail_run(&self, journal: &RunJournal, message: String) -> Result<Run> {
        error!(run_id = %journal.run_id(), error = %message, "Run failed");
        journal
            .record(
                journal
                    .event(
                        EventType::RunFailed,
                        format!("{}:complete", journal.run_id()),
                        format!("Run failed: {}", message),
                        StageStatus::Failed,
                    )
                    .with_error(message),
            )
            .await?;

        Self::load_report(journal).await
    }

    async fn load_report(journal: &RunJournal) -> Result<Run> {
        journal
            .store
            .load_run()
            .await?
            .context("Run journal is empty")
    }

    /// Run one episode through every stage.
    ///
    /// On success the three final artifacts are written and the checkpoint
    /// points at this episode. On failure nothing is persisted and the
    /// checkpoint is untouched.
    #[instrument(skip(self, journal, episode), fields(guid = %episode.guid, slug = %episode.slug))]
    pub async fn process_item(
        &self,
        journal: &RunJournal,
        episode: &Episode,
    ) -> StageResult<PipelineResult> {
        let started = Instant::now();
        journal
            .record(
                journal
                    .event(
                        EventType::ItemStarted,
                        generate_idempotency_key(&episode.guid, "item"),
                        format!("Episode '{}' started", episode.title),
                        StageStatus::Running,
                    )
                    .for_episode(&episode.guid),
            )
            .await
            .map_err(|e| StageError::new(Stage::Fetch, e))?;

        let mut media = None;
        let outcome = self.run_stages(journal, episode, &mut media).await;

        match outcome {
            Ok(result) => {
                if let Some(path) = media {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "Failed to clean up media");
                    }
                }

                journal
                    .record(
                        journal
                            .event(
                                EventType::ItemCompleted,
                                generate_idempotency_key(&episode.guid, "item"),
                                format!("Episode '{}' done", episode.title),
                                StageStatus::Completed,
                            )
                            .for_episode(&episode.guid)
                            .with_duration(started.elapsed().as_millis() as u64),
                    )
                    .await
                    .map_err(|e| StageError::new(Stage::Persist, e))?;

                Ok(result)
            }
            Err(e) => {
                let event = journal
                    .event(
                        EventType::ItemFailed,
                        generate_idempotency_key(&episode.guid, "item"),
                        format!("Episode '{}' failed at {}", episode.title, e.stage),
                        StageStatus::Failed,
                    )
                    .for_episode(&episode.guid)
                    .for_stage(e.stage)
                    .with_duration(started.elapsed().as_millis() as u64)
                    .with_error(e.to_string());

                // The stage failure is the error worth reporting
                if let Err(journal_error) = journal.record(event).await {
                    warn!(error = %journal_error, "Failed to record episode failure");
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        journal: &RunJournal,
        episode: &Episode,
        media: &mut Option<PathBuf>,
    ) -> StageResult<PipelineResult> {
        let mut progress = ItemProgress::new();

        let (raw, from_cache) = match self.cached_transcript(&episode.guid).await {
            Some(raw) => {
                info!("Raw transcript cached, skipping fetch and transcribe");
                for stage in [Stage::Fetch, Stage::Transcribe] {
                    self.record_skip(journal, episode, stage).await?;
                }
                (raw, true)
            }
            None => {
                progress.advance(Stage::Fetch, ItemState::Fetching)?;
                let fetcher = self.backends.fetcher.as_ref();
                let path = self
                    .run_stage(journal, episode, Stage::Fetch, move || fetcher.fetch(episode))
                    .await?;
                *media = Some(path.clone());

                progress.advance(Stage::Transcribe, ItemState::Transcribing)?;
                let stt = self.backends.stt.as_ref();
                let ffmpeg = self.settings.ffmpeg.as_str();
                let path = path.as_path();
                let raw = self
                    .run_stage(journal, episode, Stage::Transcribe, move || async move {
                        let decoded = audio::decode_file(path, ffmpeg).await?;
                        debug!(
                            seconds = decoded.duration_seconds(),
                            channels = decoded.channels,
                            sample_rate = decoded.sample_rate,
                            "Decoded media"
                        );
                        stt.transcribe(&decoded.prepare_for_transcription()).await
                    })
                    .await?;

                // Written before any later stage so a later failure keeps the work
                if let Err(e) = self.cache.store(&episode.guid, &raw).await {
                    warn!(error = %e, "Failed to cache raw transcript");
                }
                (raw, false)
            }
        };

        progress.advance(Stage::Normalize, ItemState::Normalizing)?;
        let raw_ref = &raw;
        let normalized = self
            .run_stage(journal, episode, Stage::Normalize, move || async move {
                normalize(raw_ref).map_err(anyhow::Error::from)
            })
            .await?;

        progress.advance(Stage::Filter, ItemState::Filtering)?;
        let filter = &self.backends.filter;
        let normalized_ref = normalized.as_str();
        let filtered = self
            .run_stage(journal, episode, Stage::Filter, move || async move {
                Ok::<_, anyhow::Error>(filter.filter(normalized_ref))
            })
            .await?;

        progress.advance(Stage::Summarize, ItemState::Summarizing)?;
        let summarizer = self.backends.summarizer.as_ref();
        let filtered_ref = filtered.as_str();
        let summary = self
            .run_stage(journal, episode, Stage::Summarize, move || async move {
                let summary = summarizer.summarize(episode, filtered_ref).await?;
                if summary.trim().is_empty() {
                    anyhow::bail!("{} returned an empty summary", summarizer.name());
                }
                Ok::<_, anyhow::Error>(summary)
            })
            .await?;

        progress.advance(Stage::Index, ItemState::Indexing)?;
        let documents = build_documents(
            episode,
            &filtered,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        );
        let index = self.backends.index.as_ref();
        let documents_ref = documents.as_slice();
        let indexed = self
            .run_stage(journal, episode, Stage::Index, move || index.add(documents_ref))
            .await?;
        debug!(chunks = indexed, "Indexed transcript");

        progress.advance(Stage::Persist, ItemState::Persisting)?;
        let summary_ref = summary.as_str();
        self.run_stage(journal, episode, Stage::Persist, move || {
            self.persist(episode, raw_ref, filtered_ref, summary_ref)
        })
        .await?;

        journal
            .record(
                journal
                    .event(
                        EventType::CheckpointAdvanced,
                        generate_idempotency_key(&episode.guid, "checkpoint"),
                        format!("Checkpoint advanced to '{}'", episode.guid),
                        StageStatus::Completed,
                    )
                    .for_episode(&episode.guid),
            )
            .await
            .map_err(|e| StageError::new(Stage::Persist, e))?;

        progress.advance(Stage::Persist, ItemState::Done)?;

        Ok(PipelineResult {
            raw_transcript: raw,
            converted_transcript: filtered,
            summary,
            from_cache,
        })
    }

    /// Cached transcript for `guid`; unreadable entries count as a miss
    async fn cached_transcript(&self, guid: &str) -> Option<RawTranscript> {
        match self.cache.has(guid).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to check stage cache, treating as miss");
                return None;
            }
        }

        match self.cache.load(guid).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(error = %e, "Failed to load cached transcript, treating as miss");
                None
            }
        }
    }

    /// Write the final artifacts, then advance the checkpoint.
    ///
    /// If any write fails, the artifacts already written are removed again.
    async fn persist(
        &self,
        episode: &Episode,
        raw: &RawTranscript,
        filtered: &str,
        summary: &str,
    ) -> Result<()> {
        let keys = ArtifactKeys::for_slug(&episode.slug);

        let raw_json =
            serde_json::to_vec_pretty(raw).context("Failed to serialize raw transcript")?;
        let record = EpisodeRecord {
            episode,
            cheat_sheet: summary,
        };
        let record_json =
            serde_json::to_vec_pretty(&record).context("Failed to serialize episode record")?;

        let writes = [
            (keys.raw_transcript.as_str(), raw_json),
            (keys.converted_transcript.as_str(), filtered.as_bytes().to_vec()),
            (keys.episode.as_str(), record_json),
        ];

        let mut written = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            if let Err(e) = self.store.put(key, value).await {
                self.discard(&written).await;
                return Err(e.into());
            }
            written.push(key);
        }

        if let Err(e) = self.checkpoint.set(&episode.guid).await {
            self.discard(&written).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Best-effort removal of artifacts from an incomplete persist
    async fn discard(&self, keys: &[&str]) {
        for key in keys {
            match self.store.delete(key).await {
                Ok(_) => debug!(key, "Removed partial artifact"),
                Err(e) => warn!(key, error = %e, "Failed to remove partial artifact"),
            }
        }
    }

    async fn record_skip(
        &self,
        journal: &RunJournal,
        episode: &Episode,
        stage: Stage,
    ) -> StageResult<()> {
        journal
            .record(
                journal
                    .event(
                        EventType::StageSkipped,
                        generate_idempotency_key(&episode.guid, stage.as_str()),
                        format!("Stage '{}' skipped, raw transcript cached", stage),
                        StageStatus::Skipped,
                    )
                    .for_episode(&episode.guid)
                    .for_stage(stage),
            )
            .await
            .map_err(|e| StageError::new(stage, e))
    }

    /// Execute a stage with journaling, timeout and retry logic
    async fn run_stage<T, F, Fut>(
        &self,
        journal: &RunJournal,
        episode: &Episode,
        stage: Stage,
        mut op: F,
    ) -> StageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let idem_key = generate_idempotency_key(&episode.guid, stage.as_str());
        let timeout = self.settings.timeouts.for_stage(stage);
        let retry = &self.settings.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let stage_start = Instant::now();

            journal
                .record(
                    journal
                        .event(
                            EventType::StageStarted,
                            idem_key.clone(),
                            format!("Stage '{}' attempt {}", stage, attempt),
                            StageStatus::Running,
                        )
                        .for_episode(&episode.guid)
                        .for_stage(stage),
                )
                .await
                .map_err(|e| StageError::new(stage, e))?;

            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("timed out after {}s", limit.as_secs())),
                },
                None => op().await,
            };

            let duration_ms = stage_start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    journal
                        .record(
                            journal
                                .event(
                                    EventType::StageCompleted,
                                    idem_key,
                                    format!("Stage '{}' completed in {}ms", stage, duration_ms),
                                    StageStatus::Completed,
                                )
                                .for_episode(&episode.guid)
                                .for_stage(stage)
                                .with_duration(duration_ms),
                        )
                        .await
                        .map_err(|e| StageError::new(stage, e))?;

                    debug!(%stage, duration_ms, "Stage completed");
                    return Ok(output);
                }
                Err(e) => {
                    if stage.is_retryable() && retry.should_retry(attempt) {
                        let delay = retry.delay_for_attempt(attempt);

                        journal
                            .record(
                                journal
                                    .event(
                                        EventType::StageRetrying,
                                        format!("{}:retry:{}", idem_key, attempt),
                                        format!(
                                            "Stage '{}' failed, retrying in {:?}: {:#}",
                                            stage, delay, e
                                        ),
                                        StageStatus::Running,
                                    )
                                    .for_episode(&episode.guid)
                                    .for_stage(stage)
                                    .with_error(format!("{:#}", e)),
                            )
                            .await
                            .map_err(|e| StageError::new(stage, e))?;

                        warn!(
                            %stage,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %format!("{:#}", e),
                            "Stage failed, retrying"
                        );

                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let failure = StageError::new(stage, e);
                    journal
                        .record(
                            journal
                                .event(
                                    EventType::StageFailed,
                                    idem_key,
                                    format!(
                                        "Stage '{}' failed after {} attempt(s)",
                                        stage, attempt
                                    ),
                                    StageStatus::Failed,
                                )
                                .for_episode(&episode.guid)
                                .for_stage(stage)
                                .with_duration(duration_ms)
                                .with_error(failure.to_string()),
                        )
                        .await
                        .map_err(|e| StageError::new(stage, e))?;

                    error!(%stage, attempt, error = %failure, "Stage failed permanently");
                    return Err(failure);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_rejects_skipped_stage() {
        let mut progress = ItemProgress::new();
        progress.advance(Stage::Fetch, ItemState::Fetching).unwrap();

        let err = progress
            .advance(Stage::Summarize, ItemState::Summarizing)
            .unwrap_err();
        assert_eq!(err.stage, Stage::Summarize);
        assert_eq!(progress.state, ItemState::Fetching);
    }

    #[test]
    fn test_progress_allows_cache_jump() {
        let mut progress = ItemProgress::new();
        progress
            .advance(Stage::Normalize, ItemState::Normalizing)
            .unwrap();
        assert_eq!(progress.state, ItemState::Normalizing);
    }
}
