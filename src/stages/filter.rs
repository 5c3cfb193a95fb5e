//! Noise filter: removes recurring scripted segments from a transcript.
//!
//! The boilerplate itself is data, not code. A [`Catalogue`] is loaded from
//! YAML (the built-in one lives in `assets/boilerplate.yaml`) and compiled
//! once into a single case-insensitive matcher.

use std::path::Path;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const BUILTIN_CATALOGUE: &str = include_str!("../../assets/boilerplate.yaml");

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Failed to read catalogue {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid catalogue: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// The set of boilerplate segments to remove
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    /// Literal text, matched ignoring case, punctuation and spacing
    #[serde(default)]
    pub phrases: Vec<String>,

    /// Raw regular expressions
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Catalogue {
    pub fn from_yaml(source: &str) -> Result<Self, FilterError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, FilterError> {
        let source = std::fs::read_to_string(path).map_err(|source| FilterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    /// The catalogue shipped with the binary
    pub fn builtin() -> Result<Self, FilterError> {
        Self::from_yaml(BUILTIN_CATALOGUE)
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.patterns.is_empty()
    }
}

/// Compiled, reusable noise filter
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    matcher: Option<Regex>,
}

impl NoiseFilter {
    pub fn new(catalogue: &Catalogue) -> Result<Self, FilterError> {
        let mut alternatives = Vec::new();

        for pattern in &catalogue.patterns {
            // Compile alone first so errors name the offending entry
            Regex::new(pattern).map_err(|source| FilterError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            alternatives.push(format!("(?:{})", pattern));
        }

        alternatives.extend(
            catalogue
                .phrases
                .iter()
                .filter_map(|phrase| phrase_pattern(phrase)),
        );

        if alternatives.is_empty() {
            return Ok(Self { matcher: None });
        }

        let combined = alternatives.join("|");
        let matcher = RegexBuilder::new(&combined)
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .map_err(|source| FilterError::InvalidPattern {
                pattern: combined.clone(),
                source,
            })?;

        debug!(alternatives = alternatives.len(), "Compiled noise filter");
        Ok(Self {
            matcher: Some(matcher),
        })
    }

    /// Filter built from [`Catalogue::builtin`]
    pub fn builtin() -> Result<Self, FilterError> {
        Self::new(&Catalogue::builtin()?)
    }

    /// A filter that only collapses whitespace
    pub fn passthrough() -> Self {
        Self { matcher: None }
    }

    /// Remove boilerplate and collapse whitespace.
    ///
    /// The pass is repeated until the text stops changing, since removing
    /// one segment can join two fragments into another. This makes
    /// `filter(filter(t)) == filter(t)` hold for every input.
    pub fn filter(&self, text: &str) -> String {
        let mut current = self.pass(text);
        loop {
            let next = self.pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn pass(&self, text: &str) -> String {
        let removed = match &self.matcher {
            Some(matcher) => matcher.replace_all(text, ""),
            None => text.into(),
        };

        let lines = blank_lines_regex().replace_all(&removed, "\n");
        let spaces = whitespace_regex().replace_all(&lines, " ");
        spaces.trim().to_string()
    }
}

/// Build a tolerant matcher for a literal phrase.
///
/// Words must appear in order; anything between them that is not a word
/// character is allowed, and apostrophes inside words are optional.
fn phrase_pattern(phrase: &str) -> Option<String> {
    let words: Vec<String> = phrase
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|word| word.trim_matches('\''))
        .filter(|word| !word.is_empty())
        .map(|word| {
            word.split('\'')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("'?")
        })
        .collect();

    if words.is_empty() {
        return None;
    }

    Some(format!(r"\b{}\b[.!?]?", words.join(r"[^\w]*")))
}

fn blank_lines_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}
