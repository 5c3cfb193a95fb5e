//! RSS/Atom feed source over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::Entry;
use tracing::debug;

use super::{FeedEntry, FeedError, FeedSource};
use crate::stages::normalize::format_timestamp;

/// Fetches a podcast feed and parses it with `feed-rs`
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<Vec<FeedEntry>, FeedError> {
        debug!(url = %self.url, "Fetching feed");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Network(format!("Failed to read feed body: {}", e)))?;

        parse_feed(&body)
    }
}

/// Parse a feed document into entries, in document order.
///
/// Entries without a `<guid>` get an empty id rather than a synthesized
/// one, so validation can reject them.
pub fn parse_feed(body: &[u8]) -> Result<Vec<FeedEntry>, FeedError> {
    let parser = feed_rs::parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build();

    let feed = parser
        .parse(body)
        .map_err(|e| FeedError::Parse(e.to_string()))?;

    Ok(feed.entries.into_iter().map(convert_entry).collect())
}

fn convert_entry(entry: Entry) -> FeedEntry {
    let media_content = entry.media.iter().flat_map(|m| m.content.iter());

    let audio_url = media_content
        .clone()
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| {
                    l.media_type
                        .as_deref()
                        .map(|t| t.starts_with("audio/"))
                        .unwrap_or(false)
                })
                .map(|l| l.href.clone())
        });

    let duration = media_content
        .clone()
        .find_map(|c| c.duration)
        .or_else(|| entry.media.iter().find_map(|m| m.duration))
        .map(|d| format_timestamp(d.as_secs_f64()));

    let link = entry
        .links
        .iter()
        .find(|l| {
            l.media_type
                .as_deref()
                .map(|t| !t.starts_with("audio/"))
                .unwrap_or(true)
        })
        .map(|l| l.href.clone());

    let summary = entry.summary.map(|t| t.content).or_else(|| {
        entry
            .media
            .iter()
            .find_map(|m| m.description.as_ref().map(|t| t.content.clone()))
    });

    let keywords = entry
        .categories
        .iter()
        .flat_map(|c| c.term.split(','))
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    FeedEntry {
        guid: Some(entry.id),
        title: entry.title.map(|t| t.content),
        link,
        audio_url,
        pub_date: entry.published,
        summary,
        keywords,
        duration,
    }
}
