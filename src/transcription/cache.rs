//! # Model Cache
//!
//! Explicit, application-owned cache of loaded Whisper models keyed by
//! [`ModelSize`]. Populated lazily on first request and shared across all
//! transcription jobs for the lifetime of the process, so each checkpoint is
//! downloaded and loaded at most once.
//!
//! The cache lives inside [`crate::state::AppState`] and is passed explicitly
//! to whatever needs a model; there is no global mutable state.

use crate::transcription::model::{ModelSize, WhisperModel};
use anyhow::Result;
use candle_core::Device;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Status of one model tier as reported by the cache.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelCacheEntry {
    pub size: ModelSize,
    pub description: String,
    pub size_mb: u32,
    pub loaded: bool,
}

/// Process-wide cache of loaded models.
///
/// Each model sits behind its own `Mutex` because Whisper decoding takes
/// `&mut self`; two jobs wanting the same tier serialize on that lock while
/// jobs on different tiers run independently.
pub struct ModelCache {
    device: Device,
    models: RwLock<HashMap<ModelSize, Arc<Mutex<WhisperModel>>>>,
}

impl ModelCache {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the model for `size`, loading it on first use.
    ///
    /// Holding the write lock across the load keeps a second request for the
    /// same tier from starting a duplicate download.
    pub async fn get_or_load(&self, size: ModelSize) -> Result<Arc<Mutex<WhisperModel>>> {
        {
            let models = self.models.read().await;
            if let Some(model) = models.get(&size) {
                return Ok(model.clone());
            }
        }

        let mut models = self.models.write().await;
        if let Some(model) = models.get(&size) {
            return Ok(model.clone());
        }

        tracing::info!(model = %size, "model not cached, loading");
        let model = WhisperModel::load(size, self.device.clone()).await?;
        let model = Arc::new(Mutex::new(model));
        models.insert(size, model.clone());

        Ok(model)
    }

    /// Whether `size` is already loaded.
    pub async fn is_loaded(&self, size: ModelSize) -> bool {
        self.models.read().await.contains_key(&size)
    }

    /// Sizes currently resident in memory.
    pub async fn loaded_sizes(&self) -> Vec<ModelSize> {
        let models = self.models.read().await;
        let mut sizes: Vec<ModelSize> = models.keys().copied().collect();
        sizes.sort_by_key(|s| s.size_mb());
        sizes
    }

    /// Status of every known tier, loaded or not.
    pub async fn entries(&self) -> Vec<ModelCacheEntry> {
        let models = self.models.read().await;
        ModelSize::ALL
            .iter()
            .map(|&size| ModelCacheEntry {
                size,
                description: size.description().to_string(),
                size_mb: size.size_mb(),
                loaded: models.contains_key(&size),
            })
            .collect()
    }

    /// Estimated total memory held by loaded models, in bytes.
    pub async fn total_memory_usage(&self) -> usize {
        let models = self.models.read().await;
        models
            .keys()
            .map(|size| size.size_mb() as usize * 1024 * 1024)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_cache_lists_all_tiers_unloaded() {
        let cache = ModelCache::new(Device::Cpu);

        let entries = cache.entries().await;
        assert_eq!(entries.len(), ModelSize::ALL.len());
        assert!(entries.iter().all(|e| !e.loaded));

        assert!(cache.loaded_sizes().await.is_empty());
        assert!(!cache.is_loaded(ModelSize::Base).await);
        assert_eq!(cache.total_memory_usage().await, 0);
    }
}
