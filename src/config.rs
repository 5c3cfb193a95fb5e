//! Configuration for feedscribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FEEDSCRIBE_HOME, FEEDSCRIBE_FEED_URL, FEEDSCRIBE_STORE,
//!    WHISPER_PATH)
//! 2. Config file (`--config` path, or .feedscribe/config.yaml)
//! 3. Defaults (~/.feedscribe)
//!
//! Config file discovery:
//! - Searches current directory and parents for .feedscribe/config.yaml
//! - Paths in the config file are relative to the .feedscribe/ directory
//!
//! The resolved [`Config`] is built once in `main` and passed by reference.
//! Nothing reads configuration from global state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::pipeline::RetryPolicy;
use crate::storage::checkpoint::DEFAULT_CHECKPOINT_KEY;

pub const CONFIG_DIR: &str = ".feedscribe";
pub const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    /// Engine state directory (runs, lock, default store)
    pub home: Option<String>,
    /// Scratch space for downloaded media
    pub work_dir: Option<String>,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageFileConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub index: IndexFileConfig,
    #[serde(default)]
    pub filter: FilterFileConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: Option<String>,
    #[serde(default = "default_feed_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_seconds: default_feed_timeout(),
            download_timeout_seconds: default_download_timeout(),
        }
    }
}

fn default_feed_timeout() -> u64 {
    60
}
fn default_download_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageFileConfig {
    pub root: Option<String>,
    pub checkpoint_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_whisper_binary")]
    pub binary: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    /// `None` lets the model detect the language
    #[serde(default = "default_language")]
    pub language: Option<String>,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_transcription_timeout")]
    pub timeout_seconds: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            binary: default_whisper_binary(),
            model: default_whisper_model(),
            language: default_language(),
            ffmpeg: default_ffmpeg(),
            timeout_seconds: default_transcription_timeout(),
        }
    }
}

fn default_whisper_binary() -> String {
    "whisper".to_string()
}
fn default_whisper_model() -> String {
    "base".to_string()
}
fn default_language() -> Option<String> {
    Some("en".to_string())
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_transcription_timeout() -> u64 {
    7200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_summary_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            model: default_summary_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            hosts: Vec::new(),
            timeout_seconds: default_service_timeout(),
        }
    }
}

fn default_api_base() -> String {
    crate::adapters::openai::DEFAULT_BASE_URL.to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_summary_model() -> String {
    "gpt-4-turbo-preview".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_service_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexFileConfig {
    pub db: Option<String>,
    pub namespace: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub embedding_model: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterFileConfig {
    /// External boilerplate catalogue replacing the built-in one
    pub catalogue: Option<String>,
}

/// Resolved index settings
#[derive(Debug, Clone, Serialize)]
pub struct IndexConfig {
    pub db_path: PathBuf,
    pub namespace: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub timeout_seconds: u64,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Engine state directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Object store root (checkpoint, cache, artifacts)
    pub store_root: PathBuf,
    pub checkpoint_key: String,
    pub work_dir: PathBuf,
    pub feed: FeedConfig,
    pub transcription: TranscriptionConfig,
    pub summary: SummaryConfig,
    pub index: IndexConfig,
    pub filter_catalogue: Option<PathBuf>,
    pub retry: RetryPolicy,

    /// Read from the variable named by `summary.api_key_env`, never from the file
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Config {
    /// Load from the process environment and the discovered (or given) file
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR);

        Self::load_with(explicit, &cwd, &default_home, |key| std::env::var(key).ok())
    }

    /// Load with explicit search root, default home and environment lookup
    pub fn load_with(
        explicit: Option<&Path>,
        search_from: &Path,
        default_home: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let config_file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(search_from),
        };

        let file = match config_file {
            Some(ref path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        // Relative paths in the file are relative to its directory
        let base_dir = config_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| search_from.to_path_buf());

        let home = env("FEEDSCRIBE_HOME")
            .map(PathBuf::from)
            .or_else(|| file.home.as_deref().map(|h| resolve_path(&base_dir, h)))
            .unwrap_or_else(|| default_home.to_path_buf());

        let store_root = env("FEEDSCRIBE_STORE")
            .map(PathBuf::from)
            .or_else(|| file.storage.root.as_deref().map(|r| resolve_path(&base_dir, r)))
            .unwrap_or_else(|| home.join("store"));

        let work_dir = file
            .work_dir
            .as_deref()
            .map(|w| resolve_path(&base_dir, w))
            .unwrap_or_else(|| home.join("work"));

        let mut feed = file.feed;
        if let Some(url) = env("FEEDSCRIBE_FEED_URL") {
            feed.url = Some(url);
        }
        feed.url = feed.url.filter(|u| !u.trim().is_empty());

        let index = IndexConfig {
            db_path: file
                .index
                .db
                .as_deref()
                .map(|d| resolve_path(&base_dir, d))
                .unwrap_or_else(|| home.join("index.sqlite")),
            namespace: file
                .index
                .namespace
                .unwrap_or_else(|| "transcripts".to_string()),
            chunk_size: file
                .index
                .chunk_size
                .unwrap_or(crate::stages::index::DEFAULT_CHUNK_SIZE),
            chunk_overlap: file
                .index
                .chunk_overlap
                .unwrap_or(crate::stages::index::DEFAULT_CHUNK_OVERLAP),
            embedding_model: file
                .index
                .embedding_model
                .unwrap_or_else(|| "text-embedding-ada-002".to_string()),
            timeout_seconds: file
                .index
                .timeout_seconds
                .unwrap_or_else(default_service_timeout),
        };

        let mut transcription = file.transcription;
        if let Some(binary) = env("WHISPER_PATH") {
            transcription.binary = binary;
        }

        let api_key = env(&file.summary.api_key_env).filter(|k| !k.trim().is_empty());

        let config = Self {
            home,
            config_file,
            store_root,
            checkpoint_key: file
                .storage
                .checkpoint_key
                .unwrap_or_else(|| DEFAULT_CHECKPOINT_KEY.to_string()),
            work_dir,
            feed,
            transcription,
            summary: file.summary,
            index,
            filter_catalogue: file
                .filter
                .catalogue
                .as_deref()
                .map(|c| resolve_path(&base_dir, c)),
            retry: file.retry,
            api_key,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.index.chunk_size == 0 {
            anyhow::bail!("index.chunk_size must be positive");
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            anyhow::bail!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap,
                self.index.chunk_size
            );
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.checkpoint_key.trim().is_empty() {
            anyhow::bail!("storage.checkpoint_key cannot be empty");
        }
        Ok(())
    }

    /// Feed URL, required by commands that read the feed
    pub fn feed_url(&self) -> Result<&str> {
        self.feed.url.as_deref().context(
            "No feed URL configured (set feed.url in .feedscribe/config.yaml or FEEDSCRIBE_FEED_URL)",
        )
    }

    /// Run journals ({home}/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Single-writer lock file
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("run.lock")
    }

    /// Downloaded media ({work_dir}/media)
    pub fn media_dir(&self) -> PathBuf {
        self.work_dir.join("media")
    }
}

/// Find config file by searching a directory and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}
