//! Command-line interface for feedscribe.
//!
//! Provides commands for processing new episodes, inspecting and editing
//! the checkpoint and stage cache, reading run journals, and searching the
//! semantic index.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::openai::ChatSettings;
use crate::adapters::{OpenAiClient, SqliteIndex};
use crate::config::Config;
use crate::core::{EventStore, Orchestrator, RunLock};
use crate::domain::{Run, RunState};
use crate::storage::{CheckpointStore, FsObjectStore, ObjectStore, StageCache};

/// feedscribe - Resumable podcast transcription pipeline
#[derive(Parser, Debug)]
#[command(name = "feedscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: search for .feedscribe/config.yaml)
    #[arg(short, long, global = true, env = "FEEDSCRIBE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process new episodes, oldest first, stopping at the first failure
    Run {
        /// Process at most this many episodes
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List episodes the next run would process
    Pending,

    /// Inspect or change the checkpoint
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// Inspect or clear cached raw transcripts
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// Search indexed transcripts
    Search {
        /// Search query
        query: String,

        /// Maximum number of hits
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// Print the last fully processed GUID
    Show,

    /// Point the checkpoint at a GUID
    Set { guid: String },

    /// Remove the checkpoint; the next run starts from the oldest episode
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List cache entries
    List,

    /// Remove cache entries
    Clear {
        /// Only remove the entry for this GUID
        #[arg(long)]
        guid: Option<String>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match self.command {
            Commands::Run { limit } => run_feed(&config, limit).await,
            Commands::Pending => list_pending(&config).await,
            Commands::Checkpoint { command } => execute_checkpoint(&config, command).await,
            Commands::Cache { command } => execute_cache(&config, command).await,
            Commands::Runs { limit } => list_runs(&config, limit).await,
            Commands::Status { run_id } => show_status(&config, &run_id).await,
            Commands::Search { query, limit } => search_index(&config, &query, limit).await,
            Commands::Config => show_config(&config),
        }
    }
}

fn object_store(config: &Config) -> Arc<dyn ObjectStore> {
    Arc::new(FsObjectStore::new(&config.store_root))
}

/// Process new episodes
async fn run_feed(config: &Config, limit: Option<usize>) -> Result<()> {
    let _lock = RunLock::acquire(&config.lock_path())?;
    let orchestrator = Orchestrator::from_config(config)?;
    let run = orchestrator.run(limit).await?;

    match &run.state {
        RunState::Completed => {
            if run.completed_items.is_empty() {
                eprintln!("[Run {}: no new episodes]", run.id);
            } else {
                for guid in &run.completed_items {
                    println!("{}", guid);
                }
                eprintln!(
                    "\n[Run {} completed: {} episode(s), checkpoint {}]",
                    run.id,
                    run.completed_items.len(),
                    run.checkpoint.as_deref().unwrap_or("-")
                );
            }
        }
        RunState::Failed { error } => {
            eprintln!(
                "\n[Run {} failed at episode {}: {}]",
                run.id,
                run.current_item.as_deref().unwrap_or("-"),
                error
            );
            eprintln!(
                "[{} episode(s) completed before the failure; rerun to resume]",
                run.completed_items.len()
            );
            std::process::exit(1);
        }
        RunState::Running => {
            eprintln!("\n[Run {} in state: {:?}]", run.id, run.state);
        }
    }

    Ok(())
}

/// List episodes after the checkpoint
async fn list_pending(config: &Config) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let episodes = orchestrator.pending().await?;

    if episodes.is_empty() {
        println!("No new episodes");
        return Ok(());
    }

    println!("{:<12} {:<40} {:<50}", "DATE", "GUID", "TITLE");
    println!("{}", "-".repeat(104));
    for episode in &episodes {
        println!(
            "{:<12} {:<40} {:<50}",
            episode.pub_date.format("%Y-%m-%d"),
            truncate(&episode.guid, 40),
            truncate(&episode.title, 50)
        );
    }
    println!("\nTotal: {} episode(s)", episodes.len());

    Ok(())
}

async fn execute_checkpoint(config: &Config, command: CheckpointCommands) -> Result<()> {
    let checkpoint = CheckpointStore::new(object_store(config), &config.checkpoint_key);

    match command {
        CheckpointCommands::Show => {
            match checkpoint.get().await {
                Some(guid) => println!("{}", guid),
                None => println!("No checkpoint (next run starts from the oldest episode)"),
            }
            Ok(())
        }
        CheckpointCommands::Set { guid } => {
            let _lock = RunLock::acquire(&config.lock_path())?;
            checkpoint
                .set(&guid)
                .await
                .context("Failed to write checkpoint")?;
            eprintln!("Checkpoint set to {}", guid.trim());
            Ok(())
        }
        CheckpointCommands::Clear => {
            let _lock = RunLock::acquire(&config.lock_path())?;
            if checkpoint.clear().await? {
                eprintln!("Checkpoint cleared");
            } else {
                eprintln!("No checkpoint to clear");
            }
            Ok(())
        }
    }
}

async fn execute_cache(config: &Config, command: CacheCommands) -> Result<()> {
    let cache = StageCache::new(object_store(config));

    match command {
        CacheCommands::List => {
            let entries = cache.entries().await?;
            if entries.is_empty() {
                println!("Cache is empty");
            }
            for key in &entries {
                println!("{}", key);
            }
            Ok(())
        }
        CacheCommands::Clear { guid } => {
            let _lock = RunLock::acquire(&config.lock_path())?;
            match guid {
                Some(guid) => {
                    if cache.evict(&guid).await? {
                        eprintln!("Removed cache entry for {}", guid);
                    } else {
                        eprintln!("No cache entry for {}", guid);
                    }
                }
                None => {
                    let removed = cache.clear().await?;
                    eprintln!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
                }
            }
            Ok(())
        }
    }
}

/// Load a run report by replaying its journal
async fn load_run(config: &Config, run_id: Uuid) -> Result<Run> {
    let runs_dir = config.runs_dir();
    if !runs_dir.join(run_id.to_string()).is_dir() {
        anyhow::bail!("Run {} not found", run_id);
    }

    let store = EventStore::open_in(&runs_dir, run_id).await?;
    store
        .load_run()
        .await?
        .with_context(|| format!("Run {} has no events", run_id))
}

/// List recent runs
async fn list_runs(config: &Config, limit: usize) -> Result<()> {
    let mut runs = Vec::new();
    for run_id in EventStore::list_runs(&config.runs_dir()).await? {
        if let Ok(run) = load_run(config, run_id).await {
            runs.push(run);
        }
    }

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    // Most recent first
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    println!("{:<38} {:<22} {:<10} {:>6}", "RUN ID", "STARTED", "STATE", "ITEMS");
    println!("{}", "-".repeat(79));

    for run in runs.iter().take(limit) {
        let state_str = match &run.state {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed { .. } => "failed",
        };
        println!(
            "{:<38} {:<22} {:<10} {:>6}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            state_str,
            run.completed_items.len()
        );
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(config: &Config, run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;
    let run = load_run(config, run_id).await?;

    println!("Run ID: {}", run.id);
    println!("State: {:?}", run.state);
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Checkpoint: {}", run.checkpoint.as_deref().unwrap_or("-"));
    println!("Completed episodes: {}", run.completed_items.len());
    for guid in &run.completed_items {
        println!("  {}", guid);
    }

    if let Some(ref current) = run.current_item {
        println!("\nLast episode: {} ({:?})", current, run.item_state);
        for stage in crate::domain::Stage::ALL {
            println!("  {}: {:?}", stage, run.stage_status(stage));
        }
    }

    Ok(())
}

/// Search the semantic index
async fn search_index(config: &Config, query: &str, limit: usize) -> Result<()> {
    let embedder = Arc::new(OpenAiClient::new(
        &config.summary.api_base,
        config.api_key.clone(),
        ChatSettings {
            model: config.summary.model.clone(),
            temperature: config.summary.temperature,
            max_tokens: config.summary.max_tokens,
            hosts: config.summary.hosts.clone(),
        },
        &config.index.embedding_model,
        Duration::from_secs(config.index.timeout_seconds),
    )?);
    let index = SqliteIndex::open(&config.index.db_path, &config.index.namespace, embedder)?;

    let hits = index.search(query, limit).await?;
    if hits.is_empty() {
        println!("No results found for: {}", query);
        return Ok(());
    }

    println!("Found {} result(s) for \"{}\":\n", hits.len(), query);
    for hit in &hits {
        println!(
            "[{:.3}] {} ({}, offset {})",
            hit.score, hit.metadata.title, hit.metadata.date, hit.metadata.start_index
        );
        println!("    {}\n", truncate(&hit.text, 200));
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(config: &Config) -> Result<()> {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!(
        "API key: {}",
        if config.api_key.is_some() { "set" } else { "not set" }
    );
    println!();
    print!(
        "{}",
        serde_yaml::to_string(config).context("Failed to render configuration")?
    );

    Ok(())
}

/// Shorten `text` to `max` characters, marking the cut
fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title here", 10), "a longe...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["feedscribe", "run", "--limit", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { limit: Some(2) }));

        let cli = Cli::try_parse_from(["feedscribe", "cache", "clear", "--guid", "abc"]).unwrap();
        match cli.command {
            Commands::Cache {
                command: CacheCommands::Clear { guid },
            } => assert_eq!(guid.as_deref(), Some("abc")),
            other => panic!("unexpected command: {:?}", other),
        }

        let cli =
            Cli::try_parse_from(["feedscribe", "checkpoint", "show", "--config", "x.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
    }
}
