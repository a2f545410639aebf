//! Deterministic provider and fixtures for unit tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{FaceError, Result};
use crate::traits::EmbeddingProvider;

/// Reads the "embedding" straight out of the image file.
///
/// `face:0.1,0.2` yields `[0.1, 0.2]`, `noface` yields `NoFaceDetected`,
/// anything else is a provider failure.
pub struct StubProvider {
    model: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn extract(&self, image_path: &Path) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = tokio::fs::read_to_string(image_path)
            .await
            .map_err(|e| FaceError::Provider(e.to_string()))?;
        let content = content.trim();
        if content == "noface" {
            return Err(FaceError::NoFaceDetected(format!(
                "{}: face could not be detected",
                image_path.display()
            )));
        }
        let values = content
            .strip_prefix("face:")
            .ok_or_else(|| FaceError::Provider(format!("unreadable fixture: {}", content)))?;
        values
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f32>()
                    .map_err(|e| FaceError::Provider(e.to_string()))
            })
            .collect()
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "stub"
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Write an image fixture whose embedding is `vector`.
pub fn write_face(dir: &Path, file_name: &str, vector: &[f32]) -> PathBuf {
    let values: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    let path = dir.join(file_name);
    std::fs::write(&path, format!("face:{}", values.join(","))).unwrap();
    path
}

/// Write an image fixture without a detectable face.
pub fn write_no_face(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, "noface").unwrap();
    path
}
