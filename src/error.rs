//! # Error Handling
//!
//! The application-wide error type and its mapping to HTTP responses.
//!
//! ## HTTP status mapping:
//! - Internal/ConfigError/ModelFailure → 500
//! - BadRequest/ValidationError → 400
//! - NotFound → 404
//! - Conflict → 409
//! - SourceUnavailable → 422
//!
//! All error responses share one JSON shape: an `error` object with a
//! machine-readable `type`, a human-readable `message`, and a timestamp.

use crate::source::SourceError;
use crate::transcription::driver::DriverError;
use crate::transcription::job::JobError;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Every failure the HTTP surface can report.
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems with no better category.
    Internal(String),

    /// Client sent invalid or malformed data.
    BadRequest(String),

    /// Requested resource does not exist.
    NotFound(String),

    /// Configuration file or environment variable problems.
    ConfigError(String),

    /// User input failed validation rules.
    ValidationError(String),

    /// The audio source could not be acquired or decoded.
    SourceUnavailable(String),

    /// The model failed while transcribing.
    ModelFailure(String),

    /// The request conflicts with the resource's current state.
    Conflict(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::SourceUnavailable(msg) => write!(f, "Source unavailable: {}", msg),
            AppError::ModelFailure(msg) => write!(f, "Model failure: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::SourceUnavailable(msg) => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                "source_unavailable",
                msg.clone(),
            ),
            AppError::ModelFailure(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "model_failure",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "conflict",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<SourceError> for AppError {
    fn from(err: SourceError) -> Self {
        AppError::SourceUnavailable(err.to_string())
    }
}

impl From<DriverError> for AppError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::InvalidChunkDuration => {
                AppError::ValidationError("chunk duration must be strictly positive".to_string())
            }
            DriverError::ModelFailure {
                chunk_index,
                source,
                ..
            } => AppError::ModelFailure(format!("chunk {} failed: {}", chunk_index, source)),
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::TooManyActive { .. } => AppError::Conflict(err.to_string()),
        }
    }
}

/// Shorthand for results carrying [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn status_codes_match_error_categories() {
        let cases = [
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (
                AppError::SourceUnavailable("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::ModelFailure("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
        ];

        for (err, expected) in cases {
            assert_eq!(err.error_response().status(), expected, "{}", err);
        }
    }

    #[test]
    fn source_errors_map_to_unprocessable_entity() {
        let err: AppError = SourceError::Unavailable("no such video".into()).into();
        assert!(matches!(err, AppError::SourceUnavailable(_)));
    }

    #[test]
    fn driver_failures_carry_the_chunk_index() {
        let err: AppError = DriverError::ModelFailure {
            chunk_index: 2,
            partial: "so far ".into(),
            source: anyhow::anyhow!("decode blew up"),
        }
        .into();
        match err {
            AppError::ModelFailure(msg) => assert!(msg.contains("chunk 2")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
