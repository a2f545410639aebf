//! HTTP face embedding client.
//!
//! Talks to a DeepFace-compatible representation service: `POST /represent`
//! with the image as a base64 data URL, answered by one result per detected
//! face.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{FaceError, Result};
use crate::traits::EmbeddingProvider;

const NO_FACE_MARKERS: &[&str] = &["could not be detected", "no face"];

/// Representation API request.
#[derive(Debug, Serialize)]
struct RepresentRequest<'a> {
    img: String,
    model_name: &'a str,
    detector_backend: &'a str,
    enforce_detection: bool,
}

/// Representation API response.
#[derive(Debug, Deserialize)]
struct RepresentResponse {
    #[serde(default)]
    results: Vec<RepresentResult>,
}

#[derive(Debug, Deserialize)]
struct RepresentResult {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct RepresentError {
    error: Option<String>,
}

/// Embedding provider backed by a remote face representation service.
pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    model_name: String,
    detector_backend: String,
}

impl HttpEmbeddingProvider {
    /// Create a new client for `base_url`.
    pub fn new(
        base_url: String,
        model_name: String,
        detector_backend: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FaceError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name,
            detector_backend,
        })
    }

    /// Create a client from the service configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.provider_url.clone(),
            config.model_name.clone(),
            config.detector_backend.clone(),
            config.provider_timeout(),
        )
    }

    fn to_data_url(bytes: &[u8]) -> String {
        let mime = image::guess_format(bytes)
            .map(|f| f.to_mime_type())
            .unwrap_or("image/jpeg");
        format!(
            "data:{};base64,{}",
            mime,
            general_purpose::STANDARD.encode(bytes)
        )
    }
}

/// The service's `error` field, or the raw body when there is none.
fn error_message(body: String) -> String {
    serde_json::from_str::<RepresentError>(&body)
        .ok()
        .and_then(|e| e.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(body)
}

fn is_no_face_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    NO_FACE_MARKERS.iter().any(|m| message.contains(m))
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn extract(&self, image_path: &Path) -> Result<Vec<f32>> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| FaceError::InvalidImage(format!("{}: {}", image_path.display(), e)))?;

        let request = RepresentRequest {
            img: Self::to_data_url(&bytes),
            model_name: &self.model_name,
            detector_backend: &self.detector_backend,
            enforce_detection: true,
        };

        let response = self
            .client
            .post(format!("{}/represent", self.base_url))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| FaceError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(body);
            if status.is_client_error() && is_no_face_message(&message) {
                return Err(FaceError::NoFaceDetected(format!(
                    "{}: {}",
                    image_path.display(),
                    message
                )));
            }
            return Err(FaceError::Provider(format!(
                "representation API error ({}): {}",
                status, message
            )));
        }

        let api_response: RepresentResponse = response
            .json()
            .await
            .map_err(|e| FaceError::Provider(e.to_string()))?;

        debug!(
            "{} face(s) found in {}",
            api_response.results.len(),
            image_path.display()
        );

        api_response
            .results
            .into_iter()
            .next()
            .map(|r| r.embedding)
            .ok_or_else(|| {
                FaceError::NoFaceDetected(format!("{}: no face in response", image_path.display()))
            })
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn provider_name(&self) -> &str {
        "http"
    }

    fn is_available(&self) -> bool {
        !self.base_url.is_empty()
    }
}
