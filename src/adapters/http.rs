//! HTTP media fetcher.
//!
//! Streams the enclosure into a `.part` file next to
//! `{media_dir}/{slug}.mp3`, checks the byte count against
//! `Content-Length`, then renames it into place. The part file is removed
//! when the download fails or is cancelled.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::MediaFetcher;
use crate::domain::Episode;

pub struct HttpFetcher {
    client: reqwest::Client,
    media_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(media_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            media_dir: media_dir.into(),
        })
    }

    /// Where the media for `episode` is written
    pub fn media_path(&self, episode: &Episode) -> PathBuf {
        self.media_dir.join(format!("{}.mp3", episode.slug))
    }

    async fn download(&self, url: &str, path: &Path) -> Result<u64> {
        let part = tempfile::Builder::new()
            .prefix(&format!(
                ".{}",
                path.file_name().and_then(|n| n.to_str()).unwrap_or("media")
            ))
            .suffix(".part")
            .tempfile_in(&self.media_dir)
            .context("Failed to create part file")?;
        let (part_file, part_path) = part.into_parts();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to start download of {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Download of {} failed with status {}", url, response.status());
        }

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::from_std(part_file);
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk)
                .await
                .context("Failed to write chunk")?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await.context("Failed to flush media file")?;
        drop(file);

        if let Some(expected) = content_length {
            if downloaded != expected {
                anyhow::bail!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded,
                    expected
                );
            }
        }

        part_path
            .persist(path)
            .with_context(|| format!("Failed to move download into {}", path.display()))?;
        Ok(downloaded)
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, episode: &Episode) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.media_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.media_dir.display()))?;

        let path = self.media_path(episode);
        debug!(url = %episode.audio_url, path = %path.display(), "Downloading media");

        let bytes = self.download(&episode.audio_url, &path).await?;
        info!(slug = %episode.slug, bytes, "Downloaded media");
        Ok(path)
    }
}
