//! Whisper transcription backend.
//!
//! Shells out to a local whisper binary. The prepared PCM buffer is written
//! as a float WAV into a temp dir, and the JSON output is mapped to
//! transcript chunks.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::SpeechToText;
use crate::domain::{RawTranscript, TranscriptChunk};
use crate::stages::audio::{encode_wav_f32, PcmAudio, TARGET_SAMPLE_RATE};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
}

pub struct WhisperCli {
    binary_path: String,
    model: String,
    language: Option<String>,
    timeout: Duration,
}

impl WhisperCli {
    pub fn new(
        binary_path: impl Into<String>,
        model: impl Into<String>,
        language: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            language: language.filter(|l| !l.trim().is_empty()),
            timeout,
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperCli {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio: &PcmAudio) -> Result<RawTranscript> {
        if audio.channels != 1 || audio.sample_rate != TARGET_SAMPLE_RATE {
            anyhow::bail!(
                "Whisper expects mono {} Hz audio, got {} channels at {} Hz",
                TARGET_SAMPLE_RATE,
                audio.channels,
                audio.sample_rate
            );
        }

        // Create temp dir for input and output
        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let input_path = temp_dir.path().join("audio.wav");
        tokio::fs::write(&input_path, encode_wav_f32(audio))
            .await
            .context("Failed to write whisper input")?;

        let mut command = Command::new(&self.binary_path);
        command
            .arg(&input_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref language) = self.language {
            command.arg("--language").arg(language);
        }

        debug!(
            model = %self.model,
            seconds = audio.duration_seconds(),
            "Running whisper"
        );

        let output = timeout(self.timeout, command.output())
            .await
            .with_context(|| format!("Whisper timed out after {:?}", self.timeout))?
            .with_context(|| format!("Failed to run {}", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Whisper failed: {}", stderr.trim());
        }

        let json_path = temp_dir.path().join("audio.json");
        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        parse_output(&json_content)
    }
}

/// Map whisper's JSON document to a raw transcript
fn parse_output(json: &str) -> Result<RawTranscript> {
    let whisper: WhisperOutput =
        serde_json::from_str(json).context("Failed to parse whisper JSON")?;

    if whisper.segments.is_empty() {
        anyhow::bail!("Whisper returned no segments");
    }

    let chunks = whisper
        .segments
        .into_iter()
        .map(|s| TranscriptChunk::new(s.text, s.start, s.end))
        .collect();

    Ok(RawTranscript {
        text: whisper.text.trim().to_string(),
        chunks,
    })
}
