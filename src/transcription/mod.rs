//! # Transcription Module
//!
//! Speech-to-text over Whisper models via the Candle-rs framework, a pure
//! Rust stack without FFI bindings to whisper.cpp.
//!
//! ## Key components:
//! - **Driver**: the chunked transcription loop that splits a stream into
//!   fixed windows and emits partial transcripts as each one completes
//! - **Model**: Whisper checkpoint loading and per-segment decoding
//! - **Cache**: lazy, process-wide model cache keyed by size
//! - **Jobs**: per-request lifecycle tracking with watch-channel updates

pub mod cache;
pub mod driver;
pub mod job;
pub mod model;

pub use cache::ModelCache;
pub use driver::{run_chunked, AudioStream, ChunkOptions, DriverError, Segment};
pub use job::{JobManager, JobSnapshot, JobState, TranscriptionJob};
pub use model::{ModelSize, WhisperModel};
