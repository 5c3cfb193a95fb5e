//! Audio preprocessing for speech-to-text.
//!
//! Speech-to-text backends take mono 16 kHz 32-bit float PCM. WAV media is
//! parsed, downmixed and resampled here; anything else is decoded straight
//! to that layout by `ffmpeg`.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed WAV data: {0}")]
    Malformed(String),

    #[error("Unsupported WAV encoding: format {format}, {bits} bits")]
    Unsupported { format: u16, bits: u16 },

    #[error("Decoder failed: {0}")]
    Decoder(String),
}

/// Interleaved PCM samples in `[-1.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmAudio {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels into one
    pub fn downmix(self) -> PcmAudio {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self;
        }

        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        PcmAudio::mono(samples, self.sample_rate)
    }

    /// Mono, 16 kHz. Audio already in that layout is returned as is.
    pub fn prepare_for_transcription(self) -> PcmAudio {
        let mono = self.downmix();
        if mono.sample_rate == TARGET_SAMPLE_RATE {
            return mono;
        }
        let samples = resample_linear(&mono.samples, mono.sample_rate, TARGET_SAMPLE_RATE);
        PcmAudio::mono(samples, TARGET_SAMPLE_RATE)
    }
}

/// Resample mono samples by linear interpolation
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let fraction = (position - index as f64) as f32;
            samples[index] + (samples[next] - samples[index]) * fraction
        })
        .collect()
}

/// Parse a RIFF/WAVE document.
///
/// Streams written by a decoder to a pipe carry placeholder sizes; a data
/// chunk that claims more bytes than remain is read to the end.
pub fn decode_wav(bytes: &[u8]) -> Result<PcmAudio, AudioError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(AudioError::Malformed("missing RIFF/WAVE header".to_string()));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut offset = 12;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4)? as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(AudioError::Malformed("fmt chunk too short".to_string()));
                }
                let mut code = read_u16(body, 0)?;
                let channels = read_u16(body, 2)?;
                let sample_rate = read_u32(body, 4)?;
                let bits = read_u16(body, 14)?;

                if code == FORMAT_EXTENSIBLE {
                    // Sub-format GUID starts with the real format code
                    code = read_u16(body, 24)?;
                }
                format = Some((code, channels, sample_rate, bits));
            }
            b"data" => {
                let (code, channels, sample_rate, bits) = format.ok_or_else(|| {
                    AudioError::Malformed("data chunk before fmt chunk".to_string())
                })?;
                if channels == 0 {
                    return Err(AudioError::Malformed("zero channels".to_string()));
                }
                let samples = decode_samples(body, code, bits)?;
                return Ok(PcmAudio {
                    samples,
                    sample_rate,
                    channels,
                });
            }
            _ => {}
        }

        // Chunks are word aligned
        offset = body_start.saturating_add(size).saturating_add(size % 2);
    }

    Err(AudioError::Malformed("no data chunk".to_string()))
}

fn decode_samples(body: &[u8], format: u16, bits: u16) -> Result<Vec<f32>, AudioError> {
    let samples = match (format, bits) {
        (FORMAT_PCM, 8) => body.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        (FORMAT_PCM, 16) => body
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        (FORMAT_PCM, 24) => body
            .chunks_exact(3)
            .map(|b| {
                let value = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                value as f32 / 8_388_608.0
            })
            .collect(),
        (FORMAT_PCM, 32) => body
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        (FORMAT_FLOAT, 32) => body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (FORMAT_FLOAT, 64) => body
            .chunks_exact(8)
            .map(|b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            })
            .collect(),
        (format, bits) => return Err(AudioError::Unsupported { format, bits }),
    };
    Ok(samples)
}

/// Encode as 32-bit float WAV
pub fn encode_wav_f32(audio: &PcmAudio) -> Vec<u8> {
    let data: Vec<u8> = audio.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    encode_wav(audio, FORMAT_FLOAT, 32, data)
}

/// Encode as 16-bit integer WAV, clamping out-of-range samples
pub fn encode_wav_pcm16(audio: &PcmAudio) -> Vec<u8> {
    let data: Vec<u8> = audio
        .samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * 32767.0).round() as i16).to_le_bytes())
        .collect();
    encode_wav(audio, FORMAT_PCM, 16, data)
}

fn encode_wav(audio: &PcmAudio, format: u16, bits: u16, data: Vec<u8>) -> Vec<u8> {
    let channels = audio.channels.max(1);
    let block_align = channels * (bits / 8);
    let byte_rate = audio.sample_rate * block_align as u32;

    let mut out = Vec::with_capacity(44 + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&audio.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    out
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, AudioError> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| AudioError::Malformed(format!("truncated at byte {}", at)))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, AudioError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| AudioError::Malformed(format!("truncated at byte {}", at)))
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Arguments that make `ffmpeg` write mono 16 kHz float WAV to stdout
fn ffmpeg_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-v", "error", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        [
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            TARGET_SAMPLE_RATE.to_string(),
            "-f".to_string(),
            "wav".to_string(),
            "-acodec".to_string(),
            "pcm_f32le".to_string(),
            "-".to_string(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args
}

async fn read_header(path: &Path) -> Result<Vec<u8>, AudioError> {
    let io_error = |source: std::io::Error| AudioError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let mut header = Vec::with_capacity(12);
    file.take(12)
        .read_to_end(&mut header)
        .await
        .map_err(io_error)?;
    Ok(header)
}

/// Decode any media file to PCM.
///
/// WAV is parsed directly; other containers go through `ffmpeg`, which
/// downmixes and resamples while decoding. The decoder is killed if the
/// returned future is dropped.
pub async fn decode_file(path: &Path, ffmpeg: &str) -> Result<PcmAudio, AudioError> {
    if is_wav(&read_header(path).await?) {
        let bytes = tokio::fs::read(path).await.map_err(|source| AudioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        return decode_wav(&bytes);
    }

    debug!(path = %path.display(), "Decoding media with ffmpeg");
    let output = Command::new(ffmpeg)
        .args(ffmpeg_args(path))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AudioError::Decoder(format!("Failed to run {}: {}", ffmpeg, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AudioError::Decoder(format!(
            "{} exited with {}: {}",
            ffmpeg,
            output.status,
            stderr.trim()
        )));
    }

    decode_wav(&output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-3, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_wav_float_roundtrip() {
        let audio = PcmAudio {
            samples: vec![0.0, 0.5, -0.5, 1.0],
            sample_rate: 44_100,
            channels: 2,
        };
        let decoded = decode_wav(&encode_wav_f32(&audio)).unwrap();
        assert_eq!(decoded, audio);
    }

    #[test]
    fn test_wav_pcm16_decodes_to_unit_range() {
        let audio = PcmAudio::mono(vec![0.0, 0.25, -1.0], 8_000);
        let decoded = decode_wav(&encode_wav_pcm16(&audio)).unwrap();
        assert_eq!(decoded.sample_rate, 8_000);
        assert_close(&decoded.samples, &audio.samples);
    }

    #[test]
    fn test_streamed_wav_with_placeholder_size() {
        let audio = PcmAudio::mono(vec![0.1, 0.2, 0.3], 16_000);
        let mut bytes = encode_wav_f32(&audio);
        // Decoders writing to a pipe cannot seek back to patch sizes
        bytes[40..44].copy_from_slice(&u32::MAX.to_le_bytes());

        assert_close(&decode_wav(&bytes).unwrap().samples, &audio.samples);
    }

    #[test]
    fn test_malformed_wav() {
        assert!(matches!(decode_wav(b"nope"), Err(AudioError::Malformed(_))));

        let mut bytes = encode_wav_f32(&PcmAudio::mono(vec![0.0], 16_000));
        bytes[20..22].copy_from_slice(&7u16.to_le_bytes());
        assert!(matches!(
            decode_wav(&bytes),
            Err(AudioError::Unsupported { format: 7, .. })
        ));
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = PcmAudio {
            samples: vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0],
            sample_rate: 16_000,
            channels: 2,
        };
        assert_eq!(stereo.downmix().samples, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_resample_linear() {
        assert_eq!(resample_linear(&[1.0, 2.0], 16_000, 16_000), vec![1.0, 2.0]);

        let down = resample_linear(&[0.0, 1.0, 2.0, 3.0], 32_000, 16_000);
        assert_close(&down, &[0.0, 2.0]);

        let up = resample_linear(&[0.0, 1.0], 8_000, 16_000);
        assert_close(&up, &[0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_prepare_for_transcription() {
        let audio = PcmAudio {
            samples: vec![0.2; 48_000 * 2],
            sample_rate: 48_000,
            channels: 2,
        };
        let prepared = audio.prepare_for_transcription();

        assert_eq!(prepared.channels, 1);
        assert_eq!(prepared.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(prepared.frames(), 16_000);
        assert!((prepared.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_decode_wav_file_without_ffmpeg() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.wav");
        let audio = PcmAudio::mono(vec![0.1, -0.1], 22_050);
        tokio::fs::write(&path, encode_wav_f32(&audio)).await.unwrap();

        let decoded = decode_file(&path, "/nonexistent/ffmpeg").await.unwrap();
        assert_eq!(decoded, audio);
    }

    #[tokio::test]
    async fn test_missing_decoder_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.mp3");
        tokio::fs::write(&path, b"ID3 not really mp3").await.unwrap();

        assert!(matches!(
            decode_file(&path, "/nonexistent/ffmpeg").await,
            Err(AudioError::Decoder(_))
        ));
    }

    #[test]
    fn test_prepared_audio_is_not_copied() {
        let audio = PcmAudio::mono(vec![0.3; 64], TARGET_SAMPLE_RATE);
        let before = audio.samples.as_ptr();
        let prepared = audio.prepare_for_transcription();
        assert_eq!(prepared.samples.as_ptr(), before);
    }

    #[test]
    fn test_ffmpeg_outputs_mono_16k() {
        let args: Vec<String> = ffmpeg_args(Path::new("/media/ep.mp3"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let joined = args.join(" ");

        assert!(joined.contains("-i /media/ep.mp3"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-ar 16000"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[cfg(unix)]
    fn fake_decoder(dir: &Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("ffmpeg");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_output_is_used_as_is() {
        let dir = tempfile::TempDir::new().unwrap();
        let media = dir.path().join("clip.mp3");
        std::fs::write(&media, b"ID3 not a wav").unwrap();

        let prepared = PcmAudio::mono(vec![0.25, -0.25, 0.5], TARGET_SAMPLE_RATE);
        let wav = dir.path().join("decoded.wav");
        std::fs::write(&wav, encode_wav_f32(&prepared)).unwrap();
        let args = dir.path().join("args");
        let ffmpeg = fake_decoder(
            dir.path(),
            &format!("echo \"$@\" > {}\ncat {}", args.display(), wav.display()),
        );

        let decoded = decode_file(&media, ffmpeg.to_str().unwrap()).await.unwrap();
        assert_eq!(decoded, prepared);

        let recorded = std::fs::read_to_string(&args).unwrap();
        assert!(recorded.contains("-ac 1 -ar 16000"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_killed_when_cancelled() {
        let dir = tempfile::TempDir::new().unwrap();
        let media = dir.path().join("clip.mp3");
        std::fs::write(&media, b"ID3 not a wav").unwrap();

        let marker = dir.path().join("finished");
        let ffmpeg = fake_decoder(dir.path(), &format!("sleep 1\ntouch {}", marker.display()));

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            decode_file(&media, ffmpeg.to_str().unwrap()),
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
