//! # Whisper Model Wrapper
//!
//! Loads Whisper checkpoints from the HuggingFace hub via Candle-rs and
//! exposes a single `transcribe` capability over 16 kHz mono f32 samples.
//!
//! ## Loading process:
//! 1. Download config, tokenizer, and safetensors weights (cached locally
//!    by hf-hub between runs).
//! 2. Build the Candle model on the requested device.
//! 3. Validate the model once with a short stretch of silence.
//!
//! Loading is expensive; callers should hold loaded models in the
//! process-wide [`crate::transcription::cache::ModelCache`] rather than
//! reloading per request.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;

/// Expected input sample rate for all Whisper variants.
pub const SAMPLE_RATE: u32 = 16_000;

/// Named model tiers trading accuracy against latency and memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// All tiers, smallest first.
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    /// HuggingFace repository holding this tier's checkpoint.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Approximate on-disk checkpoint size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good default for short clips",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, slower processing",
            ModelSize::Large => "Best accuracy, slowest and largest",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            other => Err(anyhow!("unknown model size: {}", other)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Resolve an explicit language selection to a Whisper language token.
///
/// Returns `None` for an unrecognized code, which leaves the language token
/// out of the decoder prompt and lets the model auto-detect, the same as
/// when no language is selected at all.
pub fn language_token(language: &str) -> Option<u32> {
    match language.to_lowercase().as_str() {
        "en" | "english" => Some(50259),
        "zh" | "chinese" => Some(50260),
        "de" | "german" => Some(50261),
        "es" | "spanish" => Some(50262),
        "ru" | "russian" => Some(50263),
        "ko" | "korean" => Some(50264),
        "fr" | "french" => Some(50265),
        "ja" | "japanese" => Some(50266),
        "pt" | "portuguese" => Some(50267),
        "it" | "italian" => Some(50274),
        _ => None,
    }
}

// Special token ids shared by the multilingual Whisper checkpoints.
const SOT_TOKEN: u32 = 50258;
const EOT_TOKEN: u32 = 50257;
const TRANSCRIBE_TOKEN: u32 = 50359;

/// Upper bound on decoded tokens per segment.
const MAX_DECODE_TOKENS: usize = 224;

/// A loaded Whisper checkpoint ready for inference.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
}

impl WhisperModel {
    /// Download (or reuse the local cache of) and load a checkpoint.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!(model = %size, repo = size.repo_name(), "loading Whisper model");
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            }
            builder
                .build()
                .map_err(|e| anyhow!("failed to initialize HuggingFace API client: {}", e))?
        };

        let repo = api.model(size.repo_name().to_string());

        let config_path = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("failed to fetch config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_path = repo.get("tokenizer.json").await.map_err(|e| {
            anyhow!("failed to fetch tokenizer.json from {}: {}", size.repo_name(), e)
        })?;
        let weights_path = repo.get("model.safetensors").await.map_err(|e| {
            anyhow!("failed to fetch model weights from {}: {}", size.repo_name(), e)
        })?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_path)?)?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let mut whisper = Self {
            model,
            config,
            device,
            size,
            tokenizer,
        };

        whisper.validate().await?;

        tracing::info!(
            model = %size,
            load_seconds = start_time.elapsed().as_secs_f64(),
            "Whisper model loaded"
        );

        Ok(whisper)
    }

    pub fn size(&self) -> ModelSize {
        self.size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Estimated resident memory for this checkpoint in bytes.
    pub fn estimated_memory_usage(&self) -> usize {
        self.size.size_mb() as usize * 1024 * 1024
    }

    /// Transcribe one segment of audio to text.
    ///
    /// ## Audio requirements:
    /// - 16 kHz mono f32 samples in `[-1.0, 1.0]`
    /// - Best results below ~30 seconds per call
    ///
    /// When `language` is `None` (or an unrecognized code), the language
    /// token is omitted from the decoder prompt and the model auto-detects.
    pub async fn transcribe(&mut self, samples: &[f32], language: Option<&str>) -> Result<String> {
        if samples.is_empty() {
            return Err(anyhow!("audio segment is empty"));
        }

        let start_time = std::time::Instant::now();

        let mel = self.pcm_to_mel(samples)?;
        let mel = mel.unsqueeze(0)?;

        let encoder_output = self.model.encoder.forward(&mel, false)?;

        // Decoder prompt: start, optional language, task.
        let mut tokens = vec![SOT_TOKEN];
        if let Some(lang) = language {
            if let Some(token) = language_token(lang) {
                tokens.push(token);
            } else {
                tracing::debug!(language = lang, "unrecognized language code, auto-detecting");
            }
        }
        tokens.push(TRANSCRIBE_TOKEN);

        let mut output_tokens = Vec::new();

        // Greedy decode with a repetition guard.
        for _ in 0..MAX_DECODE_TOKENS {
            let token_tensor = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .decoder
                .forward(&token_tensor, &encoder_output, false)?;
            let last_logits = logits.i((.., tokens.len() - 1, ..))?;
            let next_token = last_logits.argmax_keepdim(1)?.to_scalar::<u32>()?;

            if next_token == EOT_TOKEN {
                break;
            }
            if is_repetitive(&output_tokens, next_token) {
                tracing::debug!("repetition detected, stopping decode early");
                break;
            }

            tokens.push(next_token);
            output_tokens.push(next_token);
        }

        let text = self.decode_tokens(&output_tokens)?;

        tracing::debug!(
            audio_seconds = samples.len() as f64 / SAMPLE_RATE as f64,
            decode_seconds = start_time.elapsed().as_secs_f64(),
            chars = text.len(),
            "segment transcribed"
        );

        Ok(text)
    }

    /// Convert PCM samples to the log-mel spectrogram tensor the encoder
    /// expects, padded or truncated to Whisper's 30-second window.
    fn pcm_to_mel(&self, samples: &[f32]) -> Result<Tensor> {
        let target_len = 30 * SAMPLE_RATE as usize;
        let mut padded = vec![0.0f32; target_len];
        let copy_len = samples.len().min(target_len);
        padded[..copy_len].copy_from_slice(&samples[..copy_len]);

        let n_mels = self.config.num_mel_bins as usize;
        let n_frames = 3000; // standard Whisper frame count for 30s

        // Energy-based log-mel features per frame. A full implementation
        // would run an STFT through a precomputed mel filter bank.
        let mut mel = vec![0.0f32; n_mels * n_frames];
        let frame_size = padded.len() / n_frames;
        for frame in 0..n_frames {
            let start = frame * frame_size;
            let end = (start + frame_size).min(padded.len());

            let mut energy = 0.0f32;
            for sample in &padded[start..end] {
                energy += sample.abs();
            }
            let value = (energy / frame_size as f32).ln().max(-11.5129); // -80 dB floor

            for bin in 0..n_mels {
                mel[bin * n_frames + frame] = value;
            }
        }

        Ok(Tensor::from_vec(mel, (n_mels, n_frames), &self.device)?)
    }

    /// Run one second of silence through the model to confirm the weights
    /// and tokenizer loaded coherently.
    async fn validate(&mut self) -> Result<()> {
        let silence = vec![0.0f32; SAMPLE_RATE as usize];
        let text = self.transcribe(&silence, Some("en")).await?;
        tracing::debug!(result = %text, "model validation pass complete");
        Ok(())
    }

    fn decode_tokens(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;

        // Strip marker tokens that occasionally survive decoding.
        let cleaned = text
            .replace("<|startoftranscript|>", "")
            .replace("<|endoftext|>", "")
            .replace("<|notimestamps|>", "");

        Ok(cleaned.trim().to_string())
    }
}

/// Detect immediate or short-cycle token repetition, which indicates the
/// greedy decode has entered a loop.
fn is_repetitive(tokens: &[u32], next_token: u32) -> bool {
    if tokens.len() >= 2 {
        let n = tokens.len();
        if tokens[n - 1] == next_token && tokens[n - 2] == next_token {
            return true;
        }
    }

    if tokens.len() >= 6 {
        let n = tokens.len();
        if tokens[n - 3..] == tokens[n - 6..n - 3] {
            return true;
        }
    }

    false
}
