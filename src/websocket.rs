//! # WebSocket Job Updates
//!
//! Streams transcription progress to browsers. Clients connect to
//! `/ws/transcriptions/{id}` and receive a JSON snapshot of the job on every
//! state change, so partial transcripts appear as each chunk completes.
//!
//! ## Protocol:
//! 1. **Connection**: client connects with a job id in the path
//! 2. **Updates**: server pushes `{"type": "update", "job": {...}}` messages,
//!    starting with the current snapshot
//! 3. **Completion**: after a terminal snapshot the server closes the socket
//!
//! Heartbeats use protocol-level ping/pong frames; an unresponsive client is
//! disconnected.

use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::job::JobSnapshot;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages pushed to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutgoingMessage {
    Update { job: JobSnapshot },
}

/// WebSocket actor following one transcription job.
pub struct JobWebSocket {
    job_id: Uuid,
    updates: Option<WatchStream<JobSnapshot>>,
    last_heartbeat: Instant,
}

impl JobWebSocket {
    pub fn new(job_id: Uuid, updates: WatchStream<JobSnapshot>) -> Self {
        Self {
            job_id,
            updates: Some(updates),
            last_heartbeat: Instant::now(),
        }
    }
}

impl Actor for JobWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(job = %self.job_id, "WebSocket subscriber connected");

        // The watch stream yields the current snapshot immediately, so new
        // subscribers catch up without a separate request.
        if let Some(updates) = self.updates.take() {
            ctx.add_stream(updates);
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(job = %act.job_id, "WebSocket heartbeat timeout, closing");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(job = %self.job_id, "WebSocket subscriber disconnected");
    }
}

/// Job snapshots arriving from the watch channel.
impl StreamHandler<JobSnapshot> for JobWebSocket {
    fn handle(&mut self, snapshot: JobSnapshot, ctx: &mut Self::Context) {
        let terminal = snapshot.state.is_terminal();

        match serde_json::to_string(&OutgoingMessage::Update { job: snapshot }) {
            Ok(json) => ctx.text(json),
            Err(err) => warn!(job = %self.job_id, error = %err, "failed to serialize update"),
        }

        if terminal {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Normal,
                description: Some("job finished".to_string()),
            }));
            ctx.stop();
        }
    }
}

/// Control frames from the client. This endpoint is push-only; text and
/// binary payloads are ignored.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for JobWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(job = %self.job_id, ?reason, "WebSocket closed by client");
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(job = %self.job_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// HTTP-to-WebSocket upgrade for `/ws/transcriptions/{id}`.
pub async fn job_events(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let job = app_state
        .jobs
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("no transcription job {}", id)))?;

    let updates = WatchStream::new(job.subscribe());
    ws::start(JobWebSocket::new(id, updates), &req, stream)
        .map_err(|e| AppError::Internal(format!("WebSocket upgrade failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::job::JobState;
    use crate::transcription::model::ModelSize;
    use chrono::Utc;

    #[test]
    fn update_message_serialization() {
        let snapshot = JobSnapshot {
            id: Uuid::new_v4(),
            state: JobState::Transcribing {
                chunks_done: 1,
                total_chunks: 3,
            },
            transcript: "hello ".to_string(),
            model_size: ModelSize::Base,
            language: Some("en".to_string()),
            source: "upload:test.wav".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&OutgoingMessage::Update { job: snapshot }).unwrap();
        assert!(json.contains("\"type\":\"update\""));
        assert!(json.contains("\"transcribing\""));
        assert!(json.contains("hello "));
    }
}
