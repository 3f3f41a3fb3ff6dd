//! # Audio Decoding and Normalization
//!
//! WAV decoding with downmix and resampling to the model's sample rate,
//! plus the `ffmpeg` transcode path for everything that is not WAV.
//!
//! ## Normalization pipeline:
//! 1. Decode samples to f32 in `[-1.0, 1.0]` (any bit depth)
//! 2. Downmix interleaved channels to mono by averaging
//! 3. Linear resample to the target rate if it differs

use super::SourceError;
use crate::transcription::driver::AudioStream;
use std::path::Path;
use tokio::process::Command;

/// Decode a WAV file into a normalized mono stream at `target_rate`.
pub fn decode_wav_file(path: &Path, target_rate: u32) -> Result<AudioStream, SourceError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| SourceError::Decode(format!("failed to open WAV: {}", e)))?;

    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(SourceError::Decode("WAV reports zero channels".to_string()));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SourceError::Decode(format!("failed to read float samples: {}", e)))?,
        hound::SampleFormat::Int => {
            // Scale by the full range of the declared bit depth.
            let max = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SourceError::Decode(format!("failed to read int samples: {}", e)))?
        }
    };

    let mono = downmix(&samples, spec.channels);
    let resampled = resample_linear(&mono, spec.sample_rate, target_rate);

    AudioStream::new(resampled, target_rate)
        .map_err(|e| SourceError::Decode(format!("invalid decoded stream: {}", e)))
}

/// Average interleaved channels down to mono.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler. Adequate for speech fed to Whisper;
/// no anti-aliasing filter.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).round() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(input.len() - 1)];
            let b = input[(idx + 1).min(input.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Transcode any container ffmpeg understands into mono 16-bit WAV at
/// `target_rate`.
pub async fn transcode_to_wav(
    input: &Path,
    output: &Path,
    target_rate: u32,
) -> Result<(), SourceError> {
    let result = Command::new("ffmpeg")
        .arg("-nostdin")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-vn")
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg(target_rate.to_string())
        .arg("-f")
        .arg("wav")
        .arg(output)
        .output()
        .await;

    let output_info = match result {
        Ok(out) => out,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SourceError::Unavailable(
                "ffmpeg is not installed or not on PATH".to_string(),
            ));
        }
        Err(e) => {
            return Err(SourceError::Unavailable(format!(
                "failed to run ffmpeg: {}",
                e
            )));
        }
    };

    if !output_info.status.success() {
        let stderr = String::from_utf8_lossy(&output_info.stderr);
        return Err(SourceError::Decode(format!(
            "ffmpeg exited with {}: {}",
            output_info.status,
            tail(&stderr, 400)
        )));
    }

    Ok(())
}

/// Last `max_chars` of subprocess stderr, enough to show the actual error
/// without dumping the whole banner into the response.
pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max_chars {
        return trimmed.to_string();
    }
    let start = trimmed.len() - max_chars;
    // Avoid splitting a UTF-8 sequence.
    let start = (start..trimmed.len())
        .find(|&i| trimmed.is_char_boundary(i))
        .unwrap_or(start);
    format!("...{}", &trimmed[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i16]) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_mono_16bit_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        write_wav(&path, spec, &[0, i16::MAX, i16::MIN, 0]);

        let stream = decode_wav_file(&path, 16_000).unwrap();
        assert_eq!(stream.len(), 4);
        assert!((stream.samples()[1] - 1.0).abs() < 0.001);
        assert!((stream.samples()[2] + 1.0).abs() < 0.001);
    }

    #[test]
    fn downmixes_stereo_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        // L=max, R=min in each frame averages to ~0.
        write_wav(&path, spec, &[i16::MAX, i16::MIN, i16::MAX, i16::MIN]);

        let stream = decode_wav_file(&path, 16_000).unwrap();
        assert_eq!(stream.len(), 2);
        assert!(stream.samples().iter().all(|s| s.abs() < 0.001));
    }

    #[test]
    fn resamples_to_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        // One second at 8 kHz becomes one second at 16 kHz.
        write_wav(&path, spec, &vec![100i16; 8_000]);

        let stream = decode_wav_file(&path, 16_000).unwrap();
        assert_eq!(stream.sample_rate(), 16_000);
        assert_eq!(stream.len(), 16_000);
        assert!((stream.duration_seconds() - 1.0).abs() < 0.001);
    }

    #[test]
    fn rejects_non_wav_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio").unwrap();

        assert!(matches!(
            decode_wav_file(&path, 16_000),
            Err(SourceError::Decode(_))
        ));
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_halves_length_when_downsampling() {
        let input: Vec<f32> = (0..1_000).map(|i| i as f32 / 1_000.0).collect();
        let out = resample_linear(&input, 32_000, 16_000);
        assert_eq!(out.len(), 500);
        // Interpolated values stay within the input's range.
        assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn downmix_averages_frames() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5]);

        let mono = [0.25, 0.75];
        assert_eq!(downmix(&mono, 1), vec![0.25, 0.75]);
    }

    #[test]
    fn tail_keeps_only_the_end() {
        assert_eq!(tail("short", 10), "short");
        let long = "x".repeat(50);
        let t = tail(&long, 10);
        assert!(t.starts_with("..."));
        assert_eq!(t.len(), 13);
    }
}
