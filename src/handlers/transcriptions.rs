//! # Transcription REST API Handlers
//!
//! HTTP endpoints for submitting audio and reading results:
//! - `POST /api/v1/transcriptions/file` - submit an uploaded audio file (multipart)
//! - `POST /api/v1/transcriptions/url` - submit a video-site URL (JSON)
//! - `GET /api/v1/transcriptions/{id}` - current job snapshot with transcript
//! - `GET /api/v1/transcriptions/{id}/download` - final transcript as a file
//!
//! Submissions return `202 Accepted` immediately; the work runs on a
//! background task and progress streams over the job's WebSocket.

use crate::error::AppError;
use crate::pipeline;
use crate::source::{self, SourceInput};
use crate::state::AppState;
use crate::transcription::job::TranscriptionJob;
use crate::transcription::model::ModelSize;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Request body for URL submissions.
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
    /// Model size override (tiny, base, small, medium, large).
    pub model_size: Option<String>,
    /// Spoken-language hint, e.g. "en". Absent means auto-detect.
    pub language: Option<String>,
    /// Chunk-window override in seconds for this request only.
    pub chunk_seconds: Option<f64>,
}

/// Collected fields of a multipart upload.
#[derive(Debug, Default)]
struct UploadForm {
    filename: Option<String>,
    bytes: Option<Vec<u8>>,
    model_size: Option<String>,
    language: Option<String>,
    chunk_seconds: Option<f64>,
}

/// Submit an uploaded audio file for transcription.
///
/// ## Endpoint: `POST /api/v1/transcriptions/file`
///
/// Multipart form with an `audio` file field plus optional `model_size`,
/// `language`, and `chunk_seconds` text fields.
pub async fn submit_upload(
    app_state: web::Data<AppState>,
    payload: actix_multipart::Multipart,
) -> Result<HttpResponse, AppError> {
    let config = app_state.get_config();
    let max_bytes = config.limits.max_upload_mb * 1024 * 1024;

    let form = read_upload_form(payload, max_bytes).await?;

    let filename = form
        .filename
        .ok_or_else(|| AppError::ValidationError("no audio file field provided".to_string()))?;
    let bytes = form.bytes.unwrap_or_default();
    if bytes.is_empty() {
        return Err(AppError::ValidationError("uploaded file is empty".to_string()));
    }

    // Reject unsupported formats before admitting a job.
    source::validate_extension(&filename)?;

    let model_size = parse_model_size(form.model_size.as_deref(), &config.models.default_size)?;
    let language = form.language.or(config.models.default_language);
    let chunk_seconds = validate_chunk_seconds(form.chunk_seconds)?;

    let job = app_state.jobs.create(
        model_size,
        language,
        format!("upload:{}", filename),
    )?;

    pipeline::spawn(
        app_state.get_ref().clone(),
        job.clone(),
        SourceInput::Upload { filename, bytes },
        chunk_seconds,
    );

    Ok(accepted_response(&job))
}

/// Submit a video-site URL for transcription.
///
/// ## Endpoint: `POST /api/v1/transcriptions/url`
pub async fn submit_url(
    app_state: web::Data<AppState>,
    request: web::Json<UrlRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    let config = app_state.get_config();

    // Fail fast on malformed URLs instead of burning a job slot.
    source::remote::validate_url(&request.url)?;

    let model_size = parse_model_size(request.model_size.as_deref(), &config.models.default_size)?;
    let language = request.language.or(config.models.default_language);
    let chunk_seconds = validate_chunk_seconds(request.chunk_seconds)?;

    let job = app_state.jobs.create(
        model_size,
        language,
        format!("url:{}", request.url),
    )?;

    pipeline::spawn(
        app_state.get_ref().clone(),
        job.clone(),
        SourceInput::Url(request.url),
        chunk_seconds,
    );

    Ok(accepted_response(&job))
}

/// Current snapshot of one job, including the transcript so far.
///
/// ## Endpoint: `GET /api/v1/transcriptions/{id}`
pub async fn get_transcription(
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let job = app_state
        .jobs
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("no transcription job {}", id)))?;

    Ok(HttpResponse::Ok().json(job.snapshot()))
}

/// Download the transcript of a finished job as plain text.
///
/// ## Endpoint: `GET /api/v1/transcriptions/{id}/download`
///
/// Available once the job is terminal. A failed job serves whatever partial
/// transcript it retained.
pub async fn download_transcript(
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let job = app_state
        .jobs
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("no transcription job {}", id)))?;

    let snapshot = job.snapshot();
    if !snapshot.state.is_terminal() {
        return Err(AppError::Conflict(format!(
            "transcription job {} is still running",
            id
        )));
    }

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            "attachment; filename=\"transcript.txt\"",
        ))
        .body(snapshot.transcript))
}

fn accepted_response(job: &Arc<TranscriptionJob>) -> HttpResponse {
    let snapshot = job.snapshot();
    HttpResponse::Accepted().json(json!({
        "job": snapshot,
        "links": {
            "self": format!("/api/v1/transcriptions/{}", job.id()),
            "download": format!("/api/v1/transcriptions/{}/download", job.id()),
            "events": format!("/ws/transcriptions/{}", job.id())
        }
    }))
}

fn parse_model_size(requested: Option<&str>, default: &str) -> Result<ModelSize, AppError> {
    requested
        .unwrap_or(default)
        .parse::<ModelSize>()
        .map_err(|e| AppError::ValidationError(e.to_string()))
}

fn validate_chunk_seconds(requested: Option<f64>) -> Result<Option<f64>, AppError> {
    match requested {
        Some(secs) if !secs.is_finite() || secs <= 0.0 => Err(AppError::ValidationError(
            "chunk_seconds must be greater than 0".to_string(),
        )),
        other => Ok(other),
    }
}

async fn read_upload_form(
    mut payload: actix_multipart::Multipart,
    max_bytes: usize,
) -> Result<UploadForm, AppError> {
    use actix_multipart::Field;
    use futures_util::stream::StreamExt;

    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::ValidationError(format!("multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::ValidationError("missing content disposition".to_string()))?;

        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("missing field name".to_string()))?
            .to_string();

        match field_name.as_str() {
            "audio" => {
                form.filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(|s| s.to_string());

                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk
                        .map_err(|e| AppError::ValidationError(format!("chunk error: {}", e)))?;
                    if bytes.len() + chunk.len() > max_bytes {
                        return Err(AppError::ValidationError(format!(
                            "file too large (max {} bytes)",
                            max_bytes
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                form.bytes = Some(bytes);
            }
            "model_size" => form.model_size = Some(read_text_field(&mut field).await?),
            "language" => form.language = Some(read_text_field(&mut field).await?),
            "chunk_seconds" => {
                let text = read_text_field(&mut field).await?;
                let secs = text.parse::<f64>().map_err(|_| {
                    AppError::ValidationError(format!("invalid chunk_seconds: '{}'", text))
                })?;
                form.chunk_seconds = Some(secs);
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
                // Drain so the stream can advance.
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| {
                        AppError::ValidationError(format!("chunk error: {}", e))
                    })?;
                }
            }
        }
    }

    Ok(form)
}

async fn read_text_field(field: &mut actix_multipart::Field) -> Result<String, AppError> {
    use futures_util::stream::StreamExt;

    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::ValidationError(format!("chunk error: {}", e)))?;
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|_| AppError::ValidationError("field is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_request_parsing() {
        let json = r#"{"url": "https://example.com/v", "model_size": "small"}"#;
        let request: UrlRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.url, "https://example.com/v");
        assert_eq!(request.model_size, Some("small".to_string()));
        assert_eq!(request.language, None);
        assert_eq!(request.chunk_seconds, None);
    }

    #[test]
    fn chunk_seconds_must_be_positive() {
        assert_eq!(validate_chunk_seconds(None).unwrap(), None);
        assert_eq!(validate_chunk_seconds(Some(2.5)).unwrap(), Some(2.5));
        assert!(validate_chunk_seconds(Some(0.0)).is_err());
        assert!(validate_chunk_seconds(Some(-1.0)).is_err());
        assert!(validate_chunk_seconds(Some(f64::NAN)).is_err());
    }

    #[test]
    fn model_size_falls_back_to_default() {
        assert_eq!(
            parse_model_size(None, "base").unwrap(),
            ModelSize::Base
        );
        assert_eq!(
            parse_model_size(Some("large"), "base").unwrap(),
            ModelSize::Large
        );
        assert!(parse_model_size(Some("huge"), "base").is_err());
    }
}
