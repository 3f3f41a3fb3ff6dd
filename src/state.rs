//! # Application State Management
//!
//! Shared state handed to every HTTP handler: the runtime configuration,
//! request metrics, the model cache, and the job registry. All mutable
//! pieces sit behind `Arc<RwLock<...>>` (or their own internal locks) so
//! concurrent requests stay safe.

use crate::config::AppConfig;
use crate::transcription::cache::ModelCache;
use crate::transcription::job::JobManager;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration, updatable through the config endpoints.
    pub config: Arc<RwLock<AppConfig>>,

    /// Request counters, updated by middleware on every request.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Lazily loaded Whisper models, shared by all jobs.
    pub models: Arc<ModelCache>,

    /// In-memory registry of transcription jobs.
    pub jobs: Arc<JobManager>,

    pub start_time: Instant,
}

/// Process-wide request counters.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Per-endpoint statistics keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Counters for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, models: Arc<ModelCache>) -> Self {
        let max_jobs = config.limits.max_concurrent_jobs;
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            models,
            jobs: Arc::new(JobManager::new(max_jobs)),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration. Cloning releases the lock
    /// immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record timing and outcome for one request to `endpoint`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken under the read lock so the
    /// serializer never observes a half-updated map.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), Arc::new(ModelCache::new(Device::Cpu)))
    }

    #[test]
    fn counters_accumulate() {
        let state = state();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();

        let snap = state.get_metrics_snapshot();
        assert_eq!(snap.request_count, 2);
        assert_eq!(snap.error_count, 1);
    }

    #[test]
    fn endpoint_metrics_track_averages_and_error_rate() {
        let state = state();
        state.record_endpoint_request("POST /api/v1/transcriptions", 100, false);
        state.record_endpoint_request("POST /api/v1/transcriptions", 300, true);

        let snap = state.get_metrics_snapshot();
        let metric = &snap.endpoint_metrics["POST /api/v1/transcriptions"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn config_updates_are_validated() {
        let state = state();

        let mut bad = AppConfig::default();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        let mut good = AppConfig::default();
        good.server.port = 9000;
        assert!(state.update_config(good).is_ok());
        assert_eq!(state.get_config().server.port, 9000);
    }
}
