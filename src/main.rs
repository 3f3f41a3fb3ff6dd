//! # Audioscribe Backend - Main Application Entry Point
//!
//! HTTP server turning uploaded audio files or video-site URLs into text
//! transcripts with Whisper models, streaming partial results to browsers
//! over WebSockets as each audio chunk completes.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state, metrics, model cache, job registry
//! - **source**: audio acquisition and normalization (uploads, remote URLs)
//! - **transcription**: the chunked driver, Whisper models, cache, and jobs
//! - **pipeline**: background execution of one transcription job
//! - **handlers**: REST endpoints for submissions, results, models, config
//! - **websocket**: per-job progress streaming
//! - **middleware**: request logging and metrics collection

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod source;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::cache::ModelCache;

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audioscribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, default model '{}'",
        config.server.host, config.server.port, config.models.default_size
    );

    // Models run on CPU; Candle picks up Metal/CUDA builds through features.
    let models = Arc::new(ModelCache::new(candle_core::Device::Cpu));
    let app_state = AppState::new(config.clone(), models);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::RequestTelemetry)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/models", web::get().to(handlers::list_models))
                    .route("/models/load", web::post().to(handlers::load_model))
                    .route(
                        "/transcriptions/file",
                        web::post().to(handlers::submit_upload),
                    )
                    .route(
                        "/transcriptions/url",
                        web::post().to(handlers::submit_url),
                    )
                    .route(
                        "/transcriptions/{id}",
                        web::get().to(handlers::get_transcription),
                    )
                    .route(
                        "/transcriptions/{id}/download",
                        web::get().to(handlers::download_transcript),
                    ),
            )
            .route(
                "/ws/transcriptions/{id}",
                web::get().to(websocket::job_events),
            )
            // Health check at root level for load balancers.
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audioscribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
