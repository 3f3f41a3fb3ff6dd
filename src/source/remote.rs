//! # Remote Media Fetching
//!
//! Downloads the audio track of a video-site URL via a `yt-dlp` subprocess,
//! extracting straight to WAV so the decode path is shared with uploads.
//! The binary is resolved from PATH at call time; a missing binary is a
//! source-unavailable error, not a crash.

use super::SourceError;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Reject anything that is not a plain http(s) URL before handing it to a
/// subprocess.
pub fn validate_url(url: &str) -> Result<(), SourceError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(SourceError::Unavailable("URL is empty".to_string()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(SourceError::Unavailable(format!(
            "URL must start with http:// or https://, got '{}'",
            trimmed
        )));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(SourceError::Unavailable(
            "URL must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

/// Fetch the best audio-only stream for `url` into `workdir` as WAV.
///
/// Returns the path of the extracted file inside `workdir`. The caller owns
/// the directory and its cleanup.
pub async fn fetch_audio(url: &str, workdir: &Path) -> Result<PathBuf, SourceError> {
    validate_url(url)?;

    let output_template = workdir.join("remote.%(ext)s");
    tracing::info!(%url, "fetching remote audio");

    let result = Command::new("yt-dlp")
        .arg("--no-playlist")
        .arg("--extract-audio")
        .arg("--audio-format")
        .arg("wav")
        .arg("--output")
        .arg(&output_template)
        .arg(url)
        .output()
        .await;

    let output = match result {
        Ok(out) => out,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SourceError::Unavailable(
                "yt-dlp is not installed or not on PATH".to_string(),
            ));
        }
        Err(e) => {
            return Err(SourceError::Unavailable(format!(
                "failed to run yt-dlp: {}",
                e
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::Unavailable(format!(
            "yt-dlp exited with {}: {}",
            output.status,
            super::decode::tail(&stderr, 400)
        )));
    }

    let wav_path = workdir.join("remote.wav");
    if !wav_path.exists() {
        return Err(SourceError::Unavailable(
            "yt-dlp produced no audio file".to_string(),
        ));
    }

    Ok(wav_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(validate_url("https://example.com/watch?v=abc").is_ok());
        assert!(validate_url("http://example.com/v").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_junk() {
        assert!(validate_url("").is_err());
        assert!(validate_url("   ").is_err());
        assert!(validate_url("ftp://example.com/v").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("https://example.com/a b").is_err());
    }

    #[tokio::test]
    async fn bad_url_never_reaches_the_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let result = fetch_audio("not-a-url", dir.path()).await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }
}
