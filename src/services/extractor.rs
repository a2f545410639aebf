//! Face extraction service.
//!
//! Wraps the configured [`EmbeddingProvider`] with a content-addressed cache
//! and validates what the provider hands back.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{FaceError, Result};
use crate::services::{EmbeddingCache, VectorOps};
use crate::traits::EmbeddingProvider;

/// Front door to the embedding model for the store and the request server.
pub struct FaceExtractor {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
}

impl FaceExtractor {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache_size: usize) -> Self {
        Self {
            provider,
            cache: EmbeddingCache::new(cache_size),
        }
    }

    /// Identifier of the model behind this extractor.
    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    /// Extract the face embedding of one image.
    ///
    /// Fails with `NoFaceDetected` when the provider finds no face or returns
    /// an empty or non-finite vector.
    pub async fn extract(&self, image_path: &Path) -> Result<Vec<f32>> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| FaceError::InvalidImage(format!("{}: {}", image_path.display(), e)))?;

        let cache_key = EmbeddingCache::generate_key(&bytes, self.model_id());
        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("Cache hit for {}", image_path.display());
            return Ok(cached);
        }

        let embedding = self.provider.extract(image_path).await?;
        if !VectorOps::is_usable(&embedding) {
            return Err(FaceError::NoFaceDetected(format!(
                "{}: provider returned an unusable vector",
                image_path.display()
            )));
        }

        self.cache.insert(cache_key, embedding.clone());
        Ok(embedding)
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> (usize, usize) {
        self.cache.stats()
    }
}
