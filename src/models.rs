//! API models for request/response types.
//!
//! Defines the JSON request/response structures for the identification API.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::services::{Profile, RejectedImage};

/// Request to identify the person in an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyRequest {
    /// Base64 image, optionally as a `data:` URL.
    pub image: String,
}

/// Identification outcome.
///
/// A match serializes as `{matched: true, name, confidence}`; no match as
/// `{matched: false, confidence, message}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifyResponse {
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request to create or replace a profile from images on the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfileRequest {
    pub name: String,
    pub image_paths: Vec<PathBuf>,
}

/// Profile as shown to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub name: String,
    pub model_id: String,
    /// Number of reference images, one embedding each.
    pub image_count: usize,
    pub dimension: usize,
    pub image_refs: Vec<PathBuf>,
}

impl From<&Profile> for ProfileSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            name: profile.name.clone(),
            model_id: profile.model_id.clone(),
            image_count: profile.embeddings.len(),
            dimension: profile.dimension(),
            image_refs: profile.image_refs.clone(),
        }
    }
}

/// Response for a create or update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfileResponse {
    pub profile: ProfileSummary,
    pub replaced: bool,
    pub rejected: Vec<RejectedImage>,
}

/// Response for listing profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProfilesResponse {
    pub profiles: Vec<ProfileSummary>,
    pub count: usize,
}

/// Response for a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteProfileResponse {
    pub name: String,
    pub deleted: bool,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Embedding model behind every stored profile.
    pub model: String,
    /// Embedding provider in use.
    pub provider: String,
    pub distance_metric: String,
    pub threshold: f32,
    pub profiles: usize,
    /// Cache statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<CacheStats>,
    /// Available endpoints.
    pub endpoints: Vec<String>,
}

/// Cache statistics for health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
}

/// Error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
