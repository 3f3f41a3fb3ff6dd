//! # Transcription Pipeline
//!
//! Background execution of one transcription job: resolve the audio source,
//! get the requested model from the cache, run the chunked driver, and push
//! every state change through the job's watch channel.
//!
//! ## Failure policy:
//! A failed chunk aborts the run but the job keeps the transcript
//! accumulated before the failure, so clients can still read the partial
//! result from a Failed job.

use crate::config::AppConfig;
use crate::source::{self, SourceInput};
use crate::state::AppState;
use crate::transcription::driver::{self, ChunkOptions, DriverError};
use crate::transcription::job::{JobState, TranscriptionJob};
use std::sync::Arc;
use std::time::Duration;

/// Driver options derived from the configuration, with an optional
/// per-request window override.
pub fn chunk_options(config: &AppConfig, chunk_seconds: Option<f64>) -> ChunkOptions {
    ChunkOptions {
        chunk_duration: Duration::from_secs_f64(
            chunk_seconds.unwrap_or(config.transcription.chunk_seconds),
        ),
        pacing: match config.transcription.pacing_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        },
    }
}

/// Run a job to completion on a background task. The handler returns
/// immediately; progress is observable through the job snapshot and its
/// watch channel.
pub fn spawn(
    state: AppState,
    job: Arc<TranscriptionJob>,
    input: SourceInput,
    chunk_seconds: Option<f64>,
) {
    tokio::spawn(async move {
        run(&state, &job, input, chunk_seconds).await;
    });
}

async fn run(
    state: &AppState,
    job: &Arc<TranscriptionJob>,
    input: SourceInput,
    chunk_seconds: Option<f64>,
) {
    let config = state.get_config();

    job.set_state(JobState::Resolving);
    let audio = match source::resolve(input, config.transcription.target_sample_rate).await {
        Ok(audio) => audio,
        Err(err) => {
            job.fail(err.to_string(), None);
            return;
        }
    };

    let options = chunk_options(&config, chunk_seconds);
    let total_chunks = driver::chunk_count(&audio, &options);
    job.set_state(JobState::Transcribing {
        chunks_done: 0,
        total_chunks,
    });

    let model = match state.models.get_or_load(job.model_size()).await {
        Ok(model) => model,
        Err(err) => {
            job.fail(format!("model load failed: {}", err), None);
            return;
        }
    };

    let language = job.language().map(|s| s.to_string());
    let mut chunks_done = 0usize;

    let result = driver::run_chunked(
        &audio,
        &options,
        |segment| {
            let model = model.clone();
            let language = language.clone();
            async move {
                let mut model = model.lock().await;
                model.transcribe(&segment.samples, language.as_deref()).await
            }
        },
        |partial| {
            chunks_done += 1;
            job.set_partial(partial, chunks_done, total_chunks);
        },
    )
    .await;

    match result {
        Ok(transcript) => job.complete(transcript),
        Err(DriverError::ModelFailure {
            chunk_index,
            partial,
            source,
        }) => {
            job.fail(
                format!("transcription failed on chunk {}: {}", chunk_index, source),
                Some(partial),
            );
        }
        Err(err) => job.fail(err.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_options_follow_config() {
        let mut config = AppConfig::default();
        config.transcription.chunk_seconds = 5.0;
        config.transcription.pacing_ms = 0;

        let options = chunk_options(&config, None);
        assert_eq!(options.chunk_duration, Duration::from_secs(5));
        assert_eq!(options.pacing, None);

        config.transcription.pacing_ms = 250;
        let options = chunk_options(&config, None);
        assert_eq!(options.pacing, Some(Duration::from_millis(250)));
    }

    #[test]
    fn per_request_window_overrides_config() {
        let config = AppConfig::default();
        let options = chunk_options(&config, Some(2.5));
        assert_eq!(options.chunk_duration, Duration::from_secs_f64(2.5));
    }
}
