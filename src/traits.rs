//! Core trait for face embedding providers.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// A face embedding model reachable from the service.
///
/// Implementations turn one image into one fixed-length feature vector. An
/// image without a detectable face must fail with
/// [`FaceError::NoFaceDetected`](crate::error::FaceError::NoFaceDetected);
/// every other failure is a [`FaceError::Provider`](crate::error::FaceError::Provider).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Extract the embedding of the face in the image at `image_path`.
    async fn extract(&self, image_path: &Path) -> Result<Vec<f32>>;

    /// Identifier of the model every returned vector comes from.
    fn model_id(&self) -> &str;

    /// Get the provider name.
    fn provider_name(&self) -> &str;

    /// Check if the provider is properly configured.
    fn is_available(&self) -> bool;
}
