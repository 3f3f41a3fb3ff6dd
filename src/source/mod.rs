//! # Audio Source Resolver
//!
//! Turns a request input (an uploaded file or a remote media URL) into a
//! normalized [`AudioStream`]: mono f32 at the model's sample rate.
//!
//! ## Resolution paths:
//! - **Upload, WAV**: decoded in-process (downmix + resample as needed)
//! - **Upload, other container**: transcoded to WAV by an `ffmpeg`
//!   subprocess, then decoded
//! - **URL**: best audio-only stream fetched and extracted to WAV by a
//!   `yt-dlp` subprocess, then decoded
//!
//! Every resolution works inside its own temp directory, removed on all
//! exit paths (success, error, panic) by the `TempDir` guard. A failed
//! cleanup is logged, never fatal.

pub mod decode;
pub mod remote;

use crate::transcription::driver::AudioStream;
use std::path::Path;

/// Upload formats accepted by the service.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "ogg"];

/// One request's audio input. Upload and URL are mutually exclusive by
/// construction.
#[derive(Debug)]
pub enum SourceInput {
    Upload { filename: String, bytes: Vec<u8> },
    Url(String),
}

impl SourceInput {
    /// Short human-readable label for job listings and logs.
    pub fn label(&self) -> String {
        match self {
            SourceInput::Upload { filename, .. } => format!("upload:{}", filename),
            SourceInput::Url(url) => format!("url:{}", url),
        }
    }
}

/// Failures while acquiring or decoding audio. Both map to a user-visible
/// "source unavailable" response; the split keeps log messages precise.
#[derive(Debug)]
pub enum SourceError {
    /// The source could not be acquired: bad URL, network failure, missing
    /// helper binary, unsupported or missing upload.
    Unavailable(String),

    /// The source was acquired but its audio could not be decoded.
    Decode(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable(msg) => write!(f, "audio source unavailable: {}", msg),
            SourceError::Decode(msg) => write!(f, "audio decode failed: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Lower-cased extension of an uploaded filename, checked against the
/// supported set.
pub fn validate_extension(filename: &str) -> Result<String, SourceError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| {
            SourceError::Unavailable(format!("file '{}' has no extension", filename))
        })?;

    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(SourceError::Unavailable(format!(
            "unsupported audio format '{}' (supported: {})",
            ext,
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    Ok(ext)
}

/// Resolve a request input to a normalized audio stream.
pub async fn resolve(
    input: SourceInput,
    target_sample_rate: u32,
) -> Result<AudioStream, SourceError> {
    let workdir = tempfile::tempdir()
        .map_err(|e| SourceError::Unavailable(format!("failed to create temp dir: {}", e)))?;

    let stream = match input {
        SourceInput::Upload { filename, bytes } => {
            if bytes.is_empty() {
                return Err(SourceError::Unavailable("uploaded file is empty".to_string()));
            }
            let ext = validate_extension(&filename)?;

            let raw_path = workdir.path().join(format!("upload.{}", ext));
            tokio::fs::write(&raw_path, &bytes).await.map_err(|e| {
                SourceError::Unavailable(format!("failed to stage upload: {}", e))
            })?;

            if ext == "wav" {
                // Direct decode; fall back to ffmpeg for WAV variants hound
                // cannot read.
                match decode::decode_wav_file(&raw_path, target_sample_rate) {
                    Ok(stream) => stream,
                    Err(SourceError::Decode(reason)) => {
                        tracing::debug!(%reason, "direct WAV decode failed, transcoding");
                        transcode_and_decode(&raw_path, workdir.path(), target_sample_rate)
                            .await?
                    }
                    Err(other) => return Err(other),
                }
            } else {
                transcode_and_decode(&raw_path, workdir.path(), target_sample_rate).await?
            }
        }
        SourceInput::Url(url) => {
            let wav_path = remote::fetch_audio(&url, workdir.path()).await?;
            decode::decode_wav_file(&wav_path, target_sample_rate)?
        }
    };

    tracing::info!(
        duration_seconds = stream.duration_seconds(),
        sample_rate = stream.sample_rate(),
        "audio source resolved"
    );

    // Intermediate artifacts are removed with the workdir. Error paths rely
    // on the Drop impl instead.
    if let Err(err) = workdir.close() {
        tracing::warn!(error = %err, "failed to remove source temp dir");
    }

    Ok(stream)
}

async fn transcode_and_decode(
    input: &Path,
    workdir: &Path,
    target_sample_rate: u32,
) -> Result<AudioStream, SourceError> {
    let normalized = workdir.join("normalized.wav");
    decode::transcode_to_wav(input, &normalized, target_sample_rate).await?;
    decode::decode_wav_file(&normalized, target_sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_extensions() {
        assert_eq!(validate_extension("talk.wav").unwrap(), "wav");
        assert_eq!(validate_extension("Talk.MP3").unwrap(), "mp3");
        assert_eq!(validate_extension("a.b.m4a").unwrap(), "m4a");
        assert_eq!(validate_extension("clip.ogg").unwrap(), "ogg");
    }

    #[test]
    fn rejects_unsupported_or_missing_extensions() {
        assert!(validate_extension("movie.mkv").is_err());
        assert!(validate_extension("noextension").is_err());
    }

    #[test]
    fn input_labels_identify_the_source() {
        let upload = SourceInput::Upload {
            filename: "talk.wav".to_string(),
            bytes: vec![],
        };
        assert_eq!(upload.label(), "upload:talk.wav");

        let url = SourceInput::Url("https://example.com/v".to_string());
        assert_eq!(url.label(), "url:https://example.com/v");
    }

    #[tokio::test]
    async fn empty_upload_is_source_unavailable() {
        let input = SourceInput::Upload {
            filename: "talk.wav".to_string(),
            bytes: vec![],
        };
        let result = resolve(input, 16_000).await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn wav_upload_resolves_end_to_end() {
        // 0.5s of a quiet ramp at 8 kHz mono, resampled up to 16 kHz.
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer =
                hound::WavWriter::new(std::io::Cursor::new(&mut bytes), spec).unwrap();
            for i in 0..4_000 {
                writer.write_sample((i % 100) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let input = SourceInput::Upload {
            filename: "ramp.wav".to_string(),
            bytes,
        };
        let stream = resolve(input, 16_000).await.unwrap();

        assert_eq!(stream.sample_rate(), 16_000);
        assert!((stream.duration_seconds() - 0.5).abs() < 0.01);
    }
}
