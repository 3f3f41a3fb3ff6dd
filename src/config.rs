//! # Configuration Management
//!
//! Loads application configuration from layered sources:
//! - Built-in defaults
//! - TOML configuration file (config.toml)
//! - Environment variables with an `APP_` prefix
//! - `HOST` / `PORT` overrides used by deployment platforms
//!
//! ## Priority (highest to lowest):
//! 1. HOST / PORT environment variables
//! 2. APP_* environment variables (APP_SERVER_HOST, APP_LIMITS_MAX_UPLOAD_MB, ...)
//! 3. config.toml
//! 4. Defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration covering all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub transcription: TranscriptionConfig,
    pub limits: LimitsConfig,
}

/// Server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Whisper model defaults applied when a request leaves them out.
///
/// `default_language` of `None` means Whisper auto-detects the spoken
/// language per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_size: String,
    pub default_language: Option<String>,
}

/// Chunking parameters for the transcription loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Window length in seconds for the chunked driver.
    pub chunk_seconds: f64,
    /// Optional pause between chunks, in milliseconds. 0 disables pacing.
    pub pacing_ms: u64,
    /// Sample rate all audio is normalized to before transcription.
    pub target_sample_rate: u32,
}

/// Admission limits protecting the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_concurrent_jobs: usize,
    pub max_upload_mb: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                default_size: "base".to_string(),
                default_language: None,
            },
            transcription: TranscriptionConfig {
                chunk_seconds: 10.0,
                pacing_ms: 0,
                target_sample_rate: 16_000,
            },
            limits: LimitsConfig {
                max_concurrent_jobs: 4,
                max_upload_mb: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject bare HOST/PORT.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that would fail at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.models
            .default_size
            .parse::<crate::transcription::model::ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid default model size: {}", e))?;

        if !self.transcription.chunk_seconds.is_finite() || self.transcription.chunk_seconds <= 0.0
        {
            return Err(anyhow::anyhow!("Chunk duration must be greater than 0"));
        }

        if self.transcription.target_sample_rate == 0 {
            return Err(anyhow::anyhow!("Target sample rate must be greater than 0"));
        }

        if self.limits.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent jobs must be greater than 0"
            ));
        }

        if self.limits.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON document, validating the result.
    ///
    /// Only fields present in the JSON are changed, so a client can send
    /// `{"transcription": {"chunk_seconds": 5}}` to adjust one knob.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(models) = partial.get("models") {
            if let Some(size) = models.get("default_size").and_then(|v| v.as_str()) {
                self.models.default_size = size.to_string();
            }
            if let Some(language) = models.get("default_language") {
                self.models.default_language =
                    language.as_str().map(|s| s.to_string());
            }
        }

        if let Some(transcription) = partial.get("transcription") {
            if let Some(secs) = transcription.get("chunk_seconds").and_then(|v| v.as_f64()) {
                self.transcription.chunk_seconds = secs;
            }
            if let Some(ms) = transcription.get("pacing_ms").and_then(|v| v.as_u64()) {
                self.transcription.pacing_ms = ms;
            }
            if let Some(rate) = transcription
                .get("target_sample_rate")
                .and_then(|v| v.as_u64())
            {
                self.transcription.target_sample_rate = rate as u32;
            }
        }

        if let Some(limits) = partial.get("limits") {
            if let Some(jobs) = limits.get("max_concurrent_jobs").and_then(|v| v.as_u64()) {
                self.limits.max_concurrent_jobs = jobs as usize;
            }
            if let Some(mb) = limits.get("max_upload_mb").and_then(|v| v.as_u64()) {
                self.limits.max_upload_mb = mb as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.default_size, "base");
        assert_eq!(config.transcription.chunk_seconds, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.default_size = "gigantic".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcription.chunk_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limits.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"transcription": {"chunk_seconds": 5.0}, "server": {"port": 9090}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.transcription.chunk_seconds, 5.0);
        assert_eq!(config.server.port, 9090);
        // Untouched fields keep their values.
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.models.default_size, "base");
    }

    #[test]
    fn test_update_rejects_invalid_result() {
        let mut config = AppConfig::default();
        let json = r#"{"transcription": {"chunk_seconds": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_default_language_can_be_set_and_cleared() {
        let mut config = AppConfig::default();
        assert!(config
            .update_from_json(r#"{"models": {"default_language": "en"}}"#)
            .is_ok());
        assert_eq!(config.models.default_language.as_deref(), Some("en"));

        assert!(config
            .update_from_json(r#"{"models": {"default_language": null}}"#)
            .is_ok());
        assert_eq!(config.models.default_language, None);
    }
}
