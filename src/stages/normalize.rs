//! Normalize: raw transcript to `[HH:MM:SS] utterance` lines.

use thiserror::Error;

use crate::domain::RawTranscript;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("Transcript has no chunks")]
    Empty,

    #[error("Chunk {index} has an invalid start time: {start}")]
    InvalidTimestamp { index: usize, start: f64 },
}

/// Render whole seconds as `HH:MM:SS`, hours unbounded.
///
/// Sub-second precision is discarded; negative or non-finite input renders
/// as zero.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };

    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// One line per chunk, ordered by start time ascending.
///
/// Empty utterances still produce a line so that the time grid of the
/// transcript is preserved.
pub fn normalize(transcript: &RawTranscript) -> Result<String, NormalizeError> {
    if transcript.chunks.is_empty() {
        return Err(NormalizeError::Empty);
    }

    for (index, chunk) in transcript.chunks.iter().enumerate() {
        let start = chunk.start();
        if !start.is_finite() || start < 0.0 {
            return Err(NormalizeError::InvalidTimestamp { index, start });
        }
    }

    let mut chunks: Vec<_> = transcript.chunks.iter().collect();
    // Stable, so equal starts keep model output order
    chunks.sort_by(|a, b| a.start().total_cmp(&b.start()));

    let mut output = String::new();
    for chunk in chunks {
        output.push('[');
        output.push_str(&format_timestamp(chunk.start()));
        output.push_str("] ");
        output.push_str(chunk.text.trim());
        output.push('\n');
    }

    Ok(output)
}
