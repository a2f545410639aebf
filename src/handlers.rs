//! HTTP handlers module.
//!
//! Provides the identification endpoint and the administrative profile
//! routes. Handlers only translate between JSON and the services.

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{FaceError, Result};
use crate::models::{
    CacheStats, CreateProfileRequest, CreateProfileResponse, DeleteProfileResponse,
    ErrorResponse, HealthResponse, IdentifyRequest, IdentifyResponse, ListProfilesResponse,
    ProfileSummary,
};
use crate::services::{FaceExtractor, Identification, IdentificationEngine, ProfileStore};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers.
pub struct AppState {
    pub store: Arc<ProfileStore>,
    pub engine: Arc<IdentificationEngine>,
    pub extractor: Arc<FaceExtractor>,
    pub config: Config,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Identification
        .route("/api/identify", post(identify))
        // Administration
        .route("/api/profiles", get(list_profiles).post(create_profile))
        .route("/api/profiles/:name", get(get_profile).delete(delete_profile))
        // State
        .with_state(state)
        // Middleware
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn error_response(err: FaceError) -> ApiError {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        info!("Request rejected: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: Some(err.code().to_string()),
        }),
    )
}

/// A query image on disk for exactly as long as this value lives.
pub struct TransientImage {
    path: PathBuf,
}

impl TransientImage {
    /// Write `bytes` to a fresh file in `dir`.
    pub fn write(dir: &std::path::Path, bytes: &[u8], extension: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| FaceError::storage(dir, e))?;
        let image = Self {
            path: dir.join(format!("{}.{}", Uuid::new_v4(), extension)),
        };
        std::fs::write(&image.path, bytes).map_err(|e| FaceError::storage(&image.path, e))?;
        debug!("Saved image to: {}", image.path.display());
        Ok(image)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for TransientImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Cleaned up uploaded file: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Error cleaning up file {}: {}", self.path.display(), e),
        }
    }
}

/// Decode a base64 image (plain or data URL) and name its format.
pub fn decode_image(encoded: &str) -> Result<(Vec<u8>, &'static str)> {
    let payload = match encoded.split_once(',') {
        Some((_, data)) => data,
        None => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return Err(FaceError::InvalidImage("no base64 image provided".into()));
    }
    let bytes = general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| FaceError::InvalidImage(format!("invalid base64: {}", e)))?;
    let format = image::guess_format(&bytes)
        .map_err(|_| FaceError::InvalidImage("unrecognized image format".into()))?;
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    Ok((bytes, extension))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (size, capacity) = state.extractor.cache_stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "facematch".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.extractor.model_id().to_string(),
        provider: state.extractor.provider_name().to_string(),
        distance_metric: state.engine.metric().to_string(),
        threshold: state.engine.threshold(),
        profiles: state.store.len(),
        cache_stats: Some(CacheStats { size, capacity }),
        endpoints: vec![
            "/health".to_string(),
            "/api/identify".to_string(),
            "/api/profiles".to_string(),
            "/api/profiles/:name".to_string(),
        ],
    })
}

/// Identify the person in a base64 image.
pub async fn identify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IdentifyRequest>,
) -> std::result::Result<Json<IdentifyResponse>, ApiError> {
    let (bytes, extension) = decode_image(&request.image).map_err(error_response)?;
    let timeout = state.config.request_timeout();

    let work = async {
        let upload = TransientImage::write(&state.config.uploads_dir(), &bytes, extension)?;
        let embedding = state.extractor.extract(upload.path()).await?;
        state.engine.identify(&embedding, state.extractor.model_id())
    };
    let outcome = match tokio::time::timeout(timeout, work).await {
        Ok(result) => result.map_err(error_response)?,
        Err(_) => return Err(error_response(FaceError::Timeout(timeout))),
    };

    Ok(Json(match outcome {
        Identification::Match { name, confidence } => IdentifyResponse {
            matched: true,
            name: Some(name),
            confidence,
            message: None,
        },
        Identification::NoMatch { best_similarity } => IdentifyResponse {
            matched: false,
            name: None,
            confidence: best_similarity,
            message: Some("No matching face found".to_string()),
        },
    }))
}

/// Create or replace a profile from images already on the server.
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateProfileRequest>,
) -> std::result::Result<(StatusCode, Json<CreateProfileResponse>), ApiError> {
    info!(
        "Creating profile for {} from {} images",
        request.name,
        request.image_paths.len()
    );
    let update = state
        .store
        .create_or_update(&request.name, &request.image_paths)
        .await
        .map_err(error_response)?;

    let status = if update.replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(CreateProfileResponse {
            profile: ProfileSummary::from(update.profile.as_ref()),
            replaced: update.replaced,
            rejected: update.rejected,
        }),
    ))
}

/// List all profiles.
pub async fn list_profiles(State(state): State<Arc<AppState>>) -> Json<ListProfilesResponse> {
    let profiles: Vec<ProfileSummary> = state
        .store
        .list()
        .iter()
        .map(|p| ProfileSummary::from(p.as_ref()))
        .collect();
    Json(ListProfilesResponse {
        count: profiles.len(),
        profiles,
    })
}

/// Fetch one profile.
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<ProfileSummary>, ApiError> {
    let profile = state.store.get(&name).map_err(error_response)?;
    Ok(Json(ProfileSummary::from(profile.as_ref())))
}

/// Delete a profile; unknown names answer 404 with `deleted: false`.
pub async fn delete_profile(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> std::result::Result<(StatusCode, Json<DeleteProfileResponse>), ApiError> {
    let deleted = state.store.delete(&name).await.map_err(error_response)?;
    let status = if deleted {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(DeleteProfileResponse { name, deleted })))
}
