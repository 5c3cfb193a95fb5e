//! Episodes: the unit of work pulled from the feed.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One validated feed entry.
///
/// `guid` is the only key used for checkpointing and caching; `slug` names
/// the persisted artifacts and is derived from `title`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub guid: String,
    pub title: String,
    pub slug: String,
    pub link: String,
    pub audio_url: String,
    pub pub_date: DateTime<Utc>,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Duration as published by the feed (`HH:MM:SS`)
    #[serde(default = "default_duration")]
    pub duration: String,
}

fn default_duration() -> String {
    "00:00:00".to_string()
}

/// The persisted `episodes/{slug}.json` document
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeRecord<'a> {
    #[serde(flatten)]
    pub episode: &'a Episode,

    pub cheat_sheet: &'a str,
}

fn non_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("static regex"))
}

fn episode_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:episode|ep)\s*(\d+)").expect("static regex"))
}

fn episode_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:episode|ep)\s*\d+\s*").expect("static regex"))
}

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-\s]+").expect("static regex"))
}

/// Convert a title to a URL/filesystem-safe slug with a normalized episode number.
///
/// `"Episode 42: Some Title"` becomes `"episode-042-some-title"`. Titles
/// without an episode reference are slugified as-is.
pub fn slugify_with_episode_number(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut slug = non_word_regex().replace_all(&lowered, "").into_owned();

    let number = episode_number_regex()
        .captures(&slug)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok());

    if let Some(number) = number {
        let rest = episode_reference_regex().replace_all(&slug, "");
        slug = format!("episode-{:03}-{}", number, rest);
    }

    let slug = separator_regex().replace_all(&slug, "-");
    slug.trim_matches('-').to_string()
}
