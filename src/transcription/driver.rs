//! # Chunked Transcription Driver
//!
//! The sequential control loop at the heart of the service: partition a
//! bounded audio stream into fixed-duration windows, feed each window to a
//! transcription function, accumulate the text, and surface partial results
//! to the caller after every chunk.
//!
//! ## Guarantees:
//! - **Coverage**: chunks are contiguous, non-overlapping, and cover the
//!   whole stream exactly once; only the final chunk may be shorter.
//! - **Ordering**: transcript text is appended in chronological chunk order,
//!   never reordered.
//! - **Partial preservation**: if a chunk fails, the error carries the
//!   transcript accumulated before the failure instead of discarding it.

use std::future::Future;
use std::time::Duration;

/// A finite, in-memory audio stream: mono f32 samples at a known rate.
///
/// Owned by the driver for the duration of one transcription request and
/// never persisted.
#[derive(Debug, Clone)]
pub struct AudioStream {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioStream {
    /// Create a stream from mono samples.
    ///
    /// Fails on a zero sample rate, which would make duration undefined.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> anyhow::Result<Self> {
        if sample_rate == 0 {
            return Err(anyhow::anyhow!("sample rate must be greater than 0"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Total number of samples in the stream.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total duration derived from sample count and sample rate.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Materialize the half-open sample range `[start, end)` as an
    /// independent buffer.
    fn segment(&self, index: usize, start: usize, end: usize) -> Segment {
        Segment {
            index,
            samples: self.samples[start..end].to_vec(),
            sample_rate: self.sample_rate,
            start_seconds: start as f64 / self.sample_rate as f64,
            end_seconds: end as f64 / self.sample_rate as f64,
        }
    }
}

/// One contiguous window of audio submitted to the model as a unit of work.
///
/// A segment's lifetime ends once its transcription result has been
/// consumed; the driver produces them lazily, one at a time.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Zero-based chronological position of this chunk.
    pub index: usize,

    /// Independent copy of the samples in this window.
    pub samples: Vec<f32>,

    /// Sample rate inherited from the parent stream.
    pub sample_rate: u32,

    /// Window start offset in seconds.
    pub start_seconds: f64,

    /// Window end offset in seconds (exclusive).
    pub end_seconds: f64,
}

/// Options controlling how the driver partitions and paces a run.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Length of each window. Must be strictly positive.
    pub chunk_duration: Duration,

    /// Optional delay between chunks, used to simulate incremental arrival
    /// for live-style callers. Batch and test callers leave this unset;
    /// it never changes the output, only the emission timing. Never applied
    /// after the final chunk.
    pub pacing: Option<Duration>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_secs(10),
            pacing: None,
        }
    }
}

impl ChunkOptions {
    /// Window length in samples at the given rate, floored to at least one
    /// sample so a tiny duration still makes progress.
    pub fn chunk_samples(&self, sample_rate: u32) -> usize {
        let samples = self.chunk_duration.as_secs_f64() * sample_rate as f64;
        (samples.round() as usize).max(1)
    }
}

/// Failure modes of a driver run.
#[derive(Debug)]
pub enum DriverError {
    /// The configured chunk duration was zero.
    InvalidChunkDuration,

    /// The transcription function failed on one chunk. The run is aborted;
    /// `partial` holds the transcript accumulated before the failed chunk so
    /// callers keep everything already delivered via the partial callback.
    ModelFailure {
        chunk_index: usize,
        partial: String,
        source: anyhow::Error,
    },
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::InvalidChunkDuration => {
                write!(f, "chunk duration must be strictly positive")
            }
            DriverError::ModelFailure {
                chunk_index,
                source,
                ..
            } => {
                write!(f, "transcription failed on chunk {}: {}", chunk_index, source)
            }
        }
    }
}

impl std::error::Error for DriverError {}

/// Compute the half-open sample ranges covering `[0, total_samples)`.
///
/// Ranges step by `chunk_samples`; the final range covers the remainder and
/// may be shorter. An empty stream yields no ranges. `chunk_samples` must be
/// non-zero (enforced by [`ChunkOptions::chunk_samples`]).
pub fn chunk_bounds(total_samples: usize, chunk_samples: usize) -> Vec<(usize, usize)> {
    debug_assert!(chunk_samples > 0);
    let mut bounds = Vec::with_capacity(total_samples.div_ceil(chunk_samples));
    let mut start = 0;
    while start < total_samples {
        let end = (start + chunk_samples).min(total_samples);
        bounds.push((start, end));
        start = end;
    }
    bounds
}

/// Number of chunks a run over `audio` with `options` will produce.
pub fn chunk_count(audio: &AudioStream, options: &ChunkOptions) -> usize {
    chunk_bounds(audio.len(), options.chunk_samples(audio.sample_rate())).len()
}

/// Run the chunked transcription loop over a whole stream.
///
/// ## Process:
/// 1. Partition the stream into sequential windows of `chunk_duration`.
/// 2. Transcribe each window with `transcribe_fn`, in order.
/// 3. Append each result plus a single space separator to the transcript.
/// 4. Invoke `on_partial` with the transcript accumulated so far.
/// 5. Optionally sleep between chunks when pacing is configured.
///
/// ## Edge cases:
/// - A zero-duration stream returns an empty transcript with zero callback
///   invocations.
/// - A stream shorter than one chunk yields exactly one chunk covering the
///   whole stream.
/// - Empty per-chunk results are appended as-is, which can produce double
///   spaces; the driver does not second-guess the model's output.
pub async fn run_chunked<F, Fut, P>(
    audio: &AudioStream,
    options: &ChunkOptions,
    mut transcribe_fn: F,
    mut on_partial: P,
) -> Result<String, DriverError>
where
    F: FnMut(Segment) -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
    P: FnMut(&str),
{
    if options.chunk_duration.is_zero() {
        return Err(DriverError::InvalidChunkDuration);
    }

    let chunk_samples = options.chunk_samples(audio.sample_rate());
    let bounds = chunk_bounds(audio.len(), chunk_samples);
    let total_chunks = bounds.len();

    tracing::debug!(
        duration_seconds = audio.duration_seconds(),
        total_chunks,
        chunk_samples,
        "starting chunked transcription run"
    );

    let mut transcript = String::new();

    for (index, (start, end)) in bounds.into_iter().enumerate() {
        let segment = audio.segment(index, start, end);
        tracing::debug!(
            chunk = index,
            start_seconds = segment.start_seconds,
            end_seconds = segment.end_seconds,
            "transcribing chunk"
        );

        let text = transcribe_fn(segment)
            .await
            .map_err(|source| DriverError::ModelFailure {
                chunk_index: index,
                partial: transcript.clone(),
                source,
            })?;

        transcript.push_str(&text);
        transcript.push(' ');
        on_partial(&transcript);

        if index + 1 < total_chunks {
            if let Some(delay) = options.pacing {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    tracing::debug!(
        total_chunks,
        transcript_chars = transcript.len(),
        "chunked transcription run complete"
    );

    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stream of `seconds` of silence at a small test rate.
    fn silence(seconds: f64, sample_rate: u32) -> AudioStream {
        let samples = vec![0.0f32; (seconds * sample_rate as f64).round() as usize];
        AudioStream::new(samples, sample_rate).unwrap()
    }

    fn ten_second_chunks() -> ChunkOptions {
        ChunkOptions {
            chunk_duration: Duration::from_secs(10),
            pacing: None,
        }
    }

    #[test]
    fn rejects_zero_sample_rate() {
        assert!(AudioStream::new(vec![0.0; 4], 0).is_err());
    }

    #[test]
    fn chunk_bounds_cover_stream_exactly() {
        for (total, chunk) in [(100usize, 40usize), (100, 100), (100, 7), (1, 10), (99, 33)] {
            let bounds = chunk_bounds(total, chunk);

            // Count matches ceil(total / chunk).
            assert_eq!(bounds.len(), total.div_ceil(chunk));

            // Contiguous, non-overlapping, full coverage.
            let mut expected_start = 0;
            for &(start, end) in &bounds {
                assert_eq!(start, expected_start);
                assert!(end > start);
                expected_start = end;
            }
            assert_eq!(expected_start, total);

            // Every chunk except the last is full length; the last covers
            // the remainder.
            for &(start, end) in &bounds[..bounds.len().saturating_sub(1)] {
                assert_eq!(end - start, chunk);
            }
            if let Some(&(start, end)) = bounds.last() {
                let expected_last = if total % chunk == 0 { chunk } else { total % chunk };
                assert_eq!(end - start, expected_last);
            }
        }
    }

    #[test]
    fn chunk_bounds_empty_stream() {
        assert!(chunk_bounds(0, 10).is_empty());
    }

    #[tokio::test]
    async fn twenty_five_seconds_in_ten_second_chunks() {
        // Scenario: D = 25s, C = 10s at 4 Hz -> [0,40), [40,80), [80,100).
        let audio = silence(25.0, 4);
        let mut partials = Vec::new();

        let transcript = run_chunked(
            &audio,
            &ten_second_chunks(),
            |segment| async move { Ok(format!("chunk{}", segment.index + 1)) },
            |partial| partials.push(partial.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(transcript, "chunk1 chunk2 chunk3 ");
        assert_eq!(
            partials,
            vec![
                "chunk1 ".to_string(),
                "chunk1 chunk2 ".to_string(),
                "chunk1 chunk2 chunk3 ".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn zero_duration_stream_yields_empty_transcript() {
        let audio = silence(0.0, 16000);
        let mut callbacks = 0;

        let transcript = run_chunked(
            &audio,
            &ten_second_chunks(),
            |_segment| async move { Ok("never".to_string()) },
            |_partial| callbacks += 1,
        )
        .await
        .unwrap();

        assert_eq!(transcript, "");
        assert_eq!(callbacks, 0);
    }

    #[tokio::test]
    async fn stream_shorter_than_one_chunk_yields_single_chunk() {
        // D = 7s, C = 10s: exactly one segment covering [0, 7).
        let audio = silence(7.0, 4);
        let mut seen = Vec::new();

        let transcript = run_chunked(
            &audio,
            &ten_second_chunks(),
            |segment| {
                let window = (segment.start_seconds, segment.end_seconds);
                async move { Ok(format!("{:?}", window)) }
            },
            |partial| seen.push(partial.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(transcript, "(0.0, 7.0) ");
    }

    #[tokio::test]
    async fn failed_chunk_keeps_partial_transcript() {
        // Scenario: stub fails on the second chunk; chunk 1's text survives
        // in the error and in what the callback already delivered.
        let audio = silence(25.0, 4);
        let mut partials = Vec::new();

        let result = run_chunked(
            &audio,
            &ten_second_chunks(),
            |segment| async move {
                if segment.index == 1 {
                    Err(anyhow::anyhow!("decoder exploded"))
                } else {
                    Ok(format!("chunk{}", segment.index + 1))
                }
            },
            |partial| partials.push(partial.to_string()),
        )
        .await;

        match result {
            Err(DriverError::ModelFailure {
                chunk_index,
                partial,
                ..
            }) => {
                assert_eq!(chunk_index, 1);
                assert_eq!(partial, "chunk1 ");
            }
            other => panic!("expected ModelFailure, got {:?}", other.map(|_| ())),
        }
        assert_eq!(partials, vec!["chunk1 ".to_string()]);
    }

    #[tokio::test]
    async fn rerun_with_deterministic_stub_is_idempotent() {
        let audio = silence(25.0, 4);

        let stub = |segment: Segment| async move { Ok(format!("t{}", segment.index)) };

        let first = run_chunked(&audio, &ten_second_chunks(), stub, |_| {})
            .await
            .unwrap();
        let second = run_chunked(&audio, &ten_second_chunks(), stub, |_| {})
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_results_are_appended_as_is() {
        let audio = silence(20.0, 4);

        let transcript = run_chunked(
            &audio,
            &ten_second_chunks(),
            |segment| async move {
                if segment.index == 0 {
                    Ok(String::new())
                } else {
                    Ok("text".to_string())
                }
            },
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(transcript, " text ");
    }

    #[tokio::test]
    async fn zero_chunk_duration_is_rejected() {
        let audio = silence(5.0, 4);
        let options = ChunkOptions {
            chunk_duration: Duration::ZERO,
            pacing: None,
        };

        let result = run_chunked(
            &audio,
            &options,
            |_segment| async move { Ok(String::new()) },
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(DriverError::InvalidChunkDuration)));
    }

    #[test]
    fn chunk_count_matches_bounds() {
        let audio = silence(25.0, 4);
        assert_eq!(chunk_count(&audio, &ten_second_chunks()), 3);

        let empty = silence(0.0, 4);
        assert_eq!(chunk_count(&empty, &ten_second_chunks()), 0);
    }
}
