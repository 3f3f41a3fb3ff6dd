//! # Model Management REST API Handlers
//!
//! Endpoints for inspecting and warming the Whisper model cache:
//! - `GET /api/v1/models` - list model tiers and their load status
//! - `POST /api/v1/models/load` - load a model ahead of the first request

use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::model::ModelSize;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Request body for preloading a model.
#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
    /// Model size to load (tiny, base, small, medium, large).
    pub model_size: String,
}

/// List every model tier with its description and load status.
///
/// ## Endpoint: `GET /api/v1/models`
pub async fn list_models(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = app_state.get_config();
    let entries = app_state.models.entries().await;
    let total_memory = app_state.models.total_memory_usage().await;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": entries,
        "default_size": config.models.default_size,
        "total_memory_usage_mb": total_memory / (1024 * 1024)
    })))
}

/// Load a model into the cache so the first transcription request does not
/// pay the download cost.
///
/// ## Endpoint: `POST /api/v1/models/load`
pub async fn load_model(
    app_state: web::Data<AppState>,
    request: web::Json<LoadModelRequest>,
) -> Result<HttpResponse, AppError> {
    let size = request
        .model_size
        .parse::<ModelSize>()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let already_loaded = app_state.models.is_loaded(size).await;
    let start_time = std::time::Instant::now();

    app_state
        .models
        .get_or_load(size)
        .await
        .map_err(|e| AppError::ModelFailure(format!("failed to load {}: {}", size, e)))?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "model_size": size.to_string(),
        "already_loaded": already_loaded,
        "load_time_seconds": start_time.elapsed().as_secs_f64(),
        "estimated_memory_mb": size.size_mb()
    })))
}
