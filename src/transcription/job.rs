//! # Transcription Job Tracking
//!
//! Each transcription request becomes an in-memory job with a UUID. Jobs
//! move through a small lifecycle and publish every change on a watch
//! channel so the WebSocket surface can push partial transcripts to a
//! browser as chunks complete.
//!
//! ## Job lifecycle:
//! 1. **Queued**: accepted, waiting to start
//! 2. **Resolving**: acquiring audio (decode upload / fetch URL)
//! 3. **Transcribing**: chunk loop running, transcript growing
//! 4. **Completed**: final transcript available
//! 5. **Failed**: error recorded; transcript retained up to the failure
//!
//! Jobs are never persisted; the service keeps no durable storage.

use crate::transcription::model::ModelSize;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Lifecycle state of a transcription job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Resolving,
    Transcribing {
        chunks_done: usize,
        total_chunks: usize,
    },
    Completed,
    Failed {
        message: String,
    },
}

impl JobState {
    /// Terminal states accept no further updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed { .. })
    }
}

/// Point-in-time copy of a job, safe to serialize and send anywhere.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub state: JobState,
    pub transcript: String,
    pub model_size: ModelSize,
    pub language: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct JobInner {
    state: JobState,
    transcript: String,
    updated_at: DateTime<Utc>,
}

/// One transcription request, shared between the HTTP handlers, the
/// pipeline task doing the work, and any WebSocket subscribers.
pub struct TranscriptionJob {
    id: Uuid,
    model_size: ModelSize,
    language: Option<String>,
    source: String,
    created_at: DateTime<Utc>,
    inner: RwLock<JobInner>,
    updates: watch::Sender<JobSnapshot>,
}

impl TranscriptionJob {
    fn new(model_size: ModelSize, language: Option<String>, source: String) -> Arc<Self> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let initial = JobSnapshot {
            id,
            state: JobState::Queued,
            transcript: String::new(),
            model_size,
            language: language.clone(),
            source: source.clone(),
            created_at: now,
            updated_at: now,
        };
        let (updates, _) = watch::channel(initial);

        Arc::new(Self {
            id,
            model_size,
            language,
            source,
            created_at: now,
            inner: RwLock::new(JobInner {
                state: JobState::Queued,
                transcript: String::new(),
                updated_at: now,
            }),
            updates,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model_size(&self) -> ModelSize {
        self.model_size
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Subscribe to state changes. The receiver immediately holds the
    /// latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.read().unwrap();
        self.snapshot_of(&inner)
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.read().unwrap().state.is_terminal()
    }

    /// Move the job to a new lifecycle state.
    pub fn set_state(&self, state: JobState) {
        let mut inner = self.inner.write().unwrap();
        if inner.state.is_terminal() {
            tracing::warn!(job = %self.id, ?state, "ignoring state change on terminal job");
            return;
        }
        inner.state = state;
        inner.updated_at = Utc::now();
        self.publish(&inner);
    }

    /// Record a partial transcript after a chunk completes.
    pub fn set_partial(&self, transcript: &str, chunks_done: usize, total_chunks: usize) {
        let mut inner = self.inner.write().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.transcript = transcript.to_string();
        inner.state = JobState::Transcribing {
            chunks_done,
            total_chunks,
        };
        inner.updated_at = Utc::now();
        self.publish(&inner);
    }

    /// Record the final transcript and complete the job.
    pub fn complete(&self, transcript: String) {
        let mut inner = self.inner.write().unwrap();
        inner.transcript = transcript;
        inner.state = JobState::Completed;
        inner.updated_at = Utc::now();
        self.publish(&inner);
        tracing::info!(job = %self.id, chars = inner.transcript.len(), "job completed");
    }

    /// Fail the job, optionally retaining a partial transcript already
    /// produced before the failure.
    pub fn fail(&self, message: String, partial: Option<String>) {
        let mut inner = self.inner.write().unwrap();
        if let Some(partial) = partial {
            inner.transcript = partial;
        }
        inner.state = JobState::Failed {
            message: message.clone(),
        };
        inner.updated_at = Utc::now();
        self.publish(&inner);
        tracing::warn!(job = %self.id, error = %message, "job failed");
    }

    fn snapshot_of(&self, inner: &JobInner) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            state: inner.state.clone(),
            transcript: inner.transcript.clone(),
            model_size: self.model_size,
            language: self.language.clone(),
            source: self.source.clone(),
            created_at: self.created_at,
            updated_at: inner.updated_at,
        }
    }

    fn publish(&self, inner: &JobInner) {
        // send_replace never fails, even with no subscribers.
        self.updates.send_replace(self.snapshot_of(inner));
    }
}

/// Errors from job admission.
#[derive(Debug)]
pub enum JobError {
    /// The configured concurrent-job limit is reached.
    TooManyActive { limit: usize },
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::TooManyActive { limit } => {
                write!(f, "too many active transcription jobs (limit {})", limit)
            }
        }
    }
}

impl std::error::Error for JobError {}

/// In-memory registry of all jobs created since startup.
pub struct JobManager {
    jobs: RwLock<HashMap<Uuid, Arc<TranscriptionJob>>>,
    max_active: usize,
}

impl JobManager {
    pub fn new(max_active: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_active,
        }
    }

    /// Admit a new job, enforcing the concurrent-job limit.
    pub fn create(
        &self,
        model_size: ModelSize,
        language: Option<String>,
        source: String,
    ) -> Result<Arc<TranscriptionJob>, JobError> {
        let mut jobs = self.jobs.write().unwrap();

        let active = jobs.values().filter(|job| !job.is_terminal()).count();
        if active >= self.max_active {
            return Err(JobError::TooManyActive {
                limit: self.max_active,
            });
        }

        let job = TranscriptionJob::new(model_size, language, source);
        jobs.insert(job.id(), job.clone());
        tracing::info!(job = %job.id(), model = %model_size, "job created");

        Ok(job)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<TranscriptionJob>> {
        self.jobs.read().unwrap().get(&id).cloned()
    }

    /// Number of jobs not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.jobs
            .read()
            .unwrap()
            .values()
            .filter(|job| !job.is_terminal())
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JobManager {
        JobManager::new(2)
    }

    #[test]
    fn job_moves_through_lifecycle() {
        let mgr = manager();
        let job = mgr
            .create(ModelSize::Base, Some("en".to_string()), "upload:test.wav".into())
            .unwrap();

        assert_eq!(job.snapshot().state, JobState::Queued);

        job.set_state(JobState::Resolving);
        assert_eq!(job.snapshot().state, JobState::Resolving);

        job.set_partial("hello ", 1, 3);
        let snap = job.snapshot();
        assert_eq!(snap.transcript, "hello ");
        assert_eq!(
            snap.state,
            JobState::Transcribing {
                chunks_done: 1,
                total_chunks: 3
            }
        );

        job.complete("hello world ".to_string());
        let snap = job.snapshot();
        assert_eq!(snap.state, JobState::Completed);
        assert_eq!(snap.transcript, "hello world ");
        assert!(job.is_terminal());
    }

    #[test]
    fn failure_retains_partial_transcript() {
        let mgr = manager();
        let job = mgr
            .create(ModelSize::Base, None, "url:https://example.com/v".into())
            .unwrap();

        job.set_partial("first chunk ", 1, 3);
        job.fail("decoder exploded".to_string(), Some("first chunk ".to_string()));

        let snap = job.snapshot();
        assert!(matches!(snap.state, JobState::Failed { .. }));
        assert_eq!(snap.transcript, "first chunk ");

        // Terminal jobs ignore further updates.
        job.set_state(JobState::Resolving);
        assert!(matches!(job.snapshot().state, JobState::Failed { .. }));
    }

    #[test]
    fn concurrent_job_limit_is_enforced() {
        let mgr = manager();
        let a = mgr.create(ModelSize::Tiny, None, "a".into()).unwrap();
        let _b = mgr.create(ModelSize::Tiny, None, "b".into()).unwrap();

        assert!(matches!(
            mgr.create(ModelSize::Tiny, None, "c".into()),
            Err(JobError::TooManyActive { limit: 2 })
        ));

        // Finishing a job frees a slot.
        a.complete(String::new());
        assert!(mgr.create(ModelSize::Tiny, None, "c".into()).is_ok());
        assert_eq!(mgr.total_count(), 3);
    }

    #[test]
    fn watch_subscribers_see_updates() {
        let mgr = manager();
        let job = mgr.create(ModelSize::Base, None, "a".into()).unwrap();

        let rx = job.subscribe();
        assert_eq!(rx.borrow().state, JobState::Queued);

        job.set_partial("partial ", 1, 2);
        let snap = rx.borrow().clone();
        assert_eq!(snap.transcript, "partial ");
    }
}
