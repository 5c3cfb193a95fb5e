//! Feed traversal: from a checkpoint to the ordered list of new episodes.
//!
//! Feeds list entries newest-first. The cursor walks a snapshot in reverse
//! (oldest first), skips everything up to and including the checkpointed
//! GUID, and validates each episode it yields. A validation failure ends
//! the traversal with an error; entries are never silently dropped.

pub mod rss;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::domain::{slugify_with_episode_number, Episode};

pub use rss::HttpFeedSource;

/// Errors raised while fetching or traversing the feed
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Network error fetching feed: {0}")]
    Network(String),

    #[error("Feed request failed with status {0}")]
    Status(u16),

    #[error("Invalid feed document: {0}")]
    Parse(String),

    #[error("Episode at feed position {position} is missing required field: {field}")]
    MissingField {
        field: &'static str,
        /// 0-based index in the feed document (newest first)
        position: usize,
    },
}

/// One entry as read from the feed document, before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub audio_url: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub duration: Option<String>,
}

impl FeedEntry {
    /// GUID trimmed, `None` if missing or blank
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    /// Validate mandatory fields and build the episode
    pub fn into_episode(self, position: usize) -> Result<Episode, FeedError> {
        fn required(
            value: Option<String>,
            field: &'static str,
            position: usize,
        ) -> Result<String, FeedError> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(FeedError::MissingField { field, position })
        }

        let title = required(self.title, "title", position)?;
        let link = required(self.link, "link", position)?;
        let guid = required(self.guid, "guid", position)?;
        let audio_url = required(self.audio_url, "audio_url", position)?;
        let pub_date = self.pub_date.ok_or(FeedError::MissingField {
            field: "pub_date",
            position,
        })?;

        Ok(Episode {
            slug: slugify_with_episode_number(&title),
            guid,
            title,
            link,
            audio_url,
            pub_date,
            summary: self.summary.unwrap_or_default(),
            keywords: self
                .keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            duration: self
                .duration
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| "00:00:00".to_string()),
        })
    }
}

/// Read-only source of feed snapshots
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the whole feed, entries in document order (newest first).
    ///
    /// Any network or parse failure is an error; a partial feed is never
    /// returned.
    async fn fetch(&self) -> Result<Vec<FeedEntry>, FeedError>;
}

/// Lazy, forward-only iterator over unprocessed episodes, oldest first
pub struct FeedCursor {
    /// Remaining entries paired with their document position, oldest last
    entries: Vec<(usize, FeedEntry)>,

    /// `Some` until the checkpointed entry has been passed
    skip_until: Option<String>,

    /// Set once an error has been yielded
    finished: bool,
}

impl FeedCursor {
    /// Build a cursor over a snapshot, resuming after `last_processed`
    pub fn new(entries: Vec<FeedEntry>, last_processed: Option<&str>) -> Self {
        Self {
            entries: entries.into_iter().enumerate().collect(),
            skip_until: last_processed
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            finished: false,
        }
    }

    /// Fetch a snapshot from `source` and position the cursor after the checkpoint
    pub async fn open(
        source: &dyn FeedSource,
        last_processed: Option<&str>,
    ) -> Result<Self, FeedError> {
        let entries = source.fetch().await?;
        info!(entries = entries.len(), checkpoint = ?last_processed, "Fetched feed");
        Ok(Self::new(entries, last_processed))
    }
}

impl Iterator for FeedCursor {
    type Item = Result<Episode, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        // `entries` is newest-first, so popping yields the oldest remaining
        while let Some((position, entry)) = self.entries.pop() {
            if let Some(ref target) = self.skip_until {
                if entry.guid() == Some(target.as_str()) {
                    info!(guid = %target, "Found latest processed episode, resuming after it");
                    self.skip_until = None;
                }
                continue;
            }

            let result = entry.into_episode(position);
            if result.is_err() {
                self.finished = true;
            }
            return Some(result);
        }

        if self.skip_until.is_some() {
            info!("Checkpointed episode not present in feed, nothing new to process");
        }
        None
    }
}
