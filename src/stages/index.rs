//! Index: split a transcript into overlapping chunks for the semantic index.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::Episode;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// A chunk of text and its character offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start_index: usize,
}

/// Metadata stored next to every indexed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub date: String,
    pub guid: String,
    pub start_index: usize,
}

/// A chunk ready to be embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// Chunks end on whitespace; consecutive chunks share up to `overlap`
/// characters of trailing words. A single word longer than `chunk_size` is
/// split hard. Offsets are in characters, not bytes.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let chunk_size = chunk_size.max(1);
    let spans = word_spans(text, chunk_size);

    let mut chunks = Vec::new();
    let mut window: VecDeque<(usize, usize)> = VecDeque::new();

    for span in spans {
        let word_len = char_len(text, span);

        if !window.is_empty() && window_len(text, &window) + 1 + word_len > chunk_size {
            chunks.push(emit(text, &window));

            // Keep trailing words as overlap, leaving room for the next word
            while !window.is_empty() {
                let len = window_len(text, &window);
                if len <= overlap && len + 1 + word_len <= chunk_size {
                    break;
                }
                window.pop_front();
            }
        }

        window.push_back(span);
    }

    if !window.is_empty() {
        chunks.push(emit(text, &window));
    }

    chunks
}

/// Chunk an episode's transcript and attach its metadata
pub fn build_documents(
    episode: &Episode,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<IndexDocument> {
    let date = episode.pub_date.to_rfc3339();

    chunk_text(text, chunk_size, overlap)
        .into_iter()
        .map(|chunk| IndexDocument {
            metadata: ChunkMetadata {
                title: episode.title.clone(),
                date: date.clone(),
                guid: episode.guid.clone(),
                start_index: chunk.start_index,
            },
            text: chunk.text,
        })
        .collect()
}

/// Byte spans of whitespace-separated words, oversized words split
fn word_spans(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;

    for (i, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        match (start, c.is_whitespace()) {
            (None, false) => start = Some(i),
            (Some(s), true) => {
                split_word(text, (s, i), max_chars, &mut spans);
                start = None;
            }
            _ => {}
        }
    }

    spans
}

fn split_word(text: &str, (start, end): (usize, usize), max_chars: usize, out: &mut Vec<(usize, usize)>) {
    let mut piece_start = start;
    let mut count = 0;

    for (offset, _) in text[start..end].char_indices() {
        if count == max_chars {
            out.push((piece_start, start + offset));
            piece_start = start + offset;
            count = 0;
        }
        count += 1;
    }

    out.push((piece_start, end));
}

fn char_len(text: &str, (start, end): (usize, usize)) -> usize {
    text[start..end].chars().count()
}

fn window_len(text: &str, window: &VecDeque<(usize, usize)>) -> usize {
    match (window.front(), window.back()) {
        (Some(&(start, _)), Some(&(_, end))) => char_len(text, (start, end)),
        _ => 0,
    }
}

fn emit(text: &str, window: &VecDeque<(usize, usize)>) -> TextChunk {
    let start = window.front().map(|s| s.0).unwrap_or(0);
    let end = window.back().map(|s| s.1).unwrap_or(start);

    TextChunk {
        text: text[start..end].to_string(),
        start_index: text[..start].chars().count(),
    }
}
