//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use facematch::config::Config;
use facematch::handlers::AppState;
use facematch::services::{DistanceMetric, FaceExtractor, IdentificationEngine, ProfileStore};
use facematch::{EmbeddingProvider, FaceError, Result};

pub const MODEL: &str = "VGG-Face";

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Reads `face:<values>` or `noface` out of the image bytes, ignoring any
/// leading image signature. Any other content is a provider failure.
#[derive(Default)]
pub struct StubProvider {
    delay: Option<Duration>,
}

impl StubProvider {
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn extract(&self, image_path: &Path) -> Result<Vec<f32>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| FaceError::Provider(e.to_string()))?;
        let content = String::from_utf8_lossy(&bytes);
        if content.contains("noface") {
            return Err(FaceError::NoFaceDetected("face could not be detected".into()));
        }
        let start = content
            .find("face:")
            .ok_or_else(|| FaceError::Provider("unreadable fixture".into()))?;
        content[start + "face:".len()..]
            .trim()
            .split(',')
            .map(|v| v.trim().parse::<f32>().map_err(|e| FaceError::Provider(e.to_string())))
            .collect()
    }

    fn model_id(&self) -> &str {
        MODEL
    }

    fn provider_name(&self) -> &str {
        "stub"
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn face_payload(vector: &[f32]) -> String {
    let values: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("face:{}", values.join(","))
}

/// Write a labeled photograph whose embedding is `vector`.
pub fn write_face(dir: &Path, file_name: &str, vector: &[f32]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, face_payload(vector)).unwrap();
    path
}

pub fn write_no_face(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, "noface").unwrap();
    path
}

/// Base64 PNG-signed image carrying `vector`.
pub fn encoded_face(vector: &[f32]) -> String {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(face_payload(vector).as_bytes());
    general_purpose::STANDARD.encode(bytes)
}

pub fn encoded_no_face() -> String {
    encoded_png(b"noface")
}

/// A well-formed image the stub provider cannot read.
pub fn encoded_unreadable() -> String {
    encoded_png(b"corrupt")
}

fn encoded_png(payload: &[u8]) -> String {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(payload);
    general_purpose::STANDARD.encode(bytes)
}

pub fn test_config(root: &Path, metric: DistanceMetric) -> Config {
    let inbox_dir = root.join("inbox");
    Config {
        port: 0,
        host: "127.0.0.1".to_string(),
        data_dir: root.join("data"),
        errors_dir: inbox_dir.join("errors"),
        inbox_dir,
        provider_url: "http://localhost:5005".to_string(),
        model_name: MODEL.to_string(),
        detector_backend: "opencv".to_string(),
        distance_metric: metric,
        threshold: 0.4,
        ingest_interval_seconds: 1,
        ingest_max_concurrency: 2,
        ingest_group_timeout_seconds: 10,
        request_timeout_seconds: 5,
        provider_timeout_seconds: 5,
        cache_size: 16,
        max_body_bytes: 1024 * 1024,
    }
}

/// Wire the services the way the binary does, around the stub provider.
pub async fn build_state(config: Config) -> Arc<AppState> {
    build_state_with(config, StubProvider::default()).await
}

pub async fn build_state_with(config: Config, provider: StubProvider) -> Arc<AppState> {
    config.ensure_dirs().unwrap();
    let extractor = Arc::new(FaceExtractor::new(Arc::new(provider), config.cache_size));
    let store = Arc::new(ProfileStore::new(config.to_store_config(), extractor.clone()));
    store.load().await.unwrap();
    let engine = Arc::new(IdentificationEngine::new(
        store.clone(),
        config.distance_metric,
        config.threshold,
    ));
    Arc::new(AppState {
        store,
        engine,
        extractor,
        config,
    })
}
