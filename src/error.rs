//! Error taxonomy for the face matching core.

use axum::http::StatusCode;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, FaceError>;

/// Errors produced by the store, the engine, the extractor and the provider.
///
/// "Nobody matched" is not an error; see [`crate::services::Identification`].
#[derive(Debug, Error)]
pub enum FaceError {
    /// An image yielded no usable embedding.
    #[error("no face detected: {0}")]
    NoFaceDetected(String),

    /// The referenced profile does not exist.
    #[error("profile not found: {0}")]
    NotFound(String),

    /// A persisted record or reference image could not be read or written.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Embeddings from different models, or of different dimensionality,
    /// were about to be compared.
    #[error("model mismatch: expected {expected}, found {found}")]
    ModelMismatch { expected: String, found: String },

    /// The profile name cannot be used as a store key.
    #[error("invalid profile name: {0:?}")]
    InvalidName(String),

    /// The submitted bytes are not a decodable image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The embedding provider failed for a reason other than "no face".
    #[error("embedding provider failure: {0}")]
    Provider(String),

    /// The operation did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store has been closed and accepts no more writes.
    #[error("profile store is closed")]
    StoreClosed,
}

impl FaceError {
    /// Wrap an I/O or serialization failure that concerns `path`.
    pub fn storage(path: &Path, err: impl std::fmt::Display) -> Self {
        FaceError::Storage(format!("{}: {}", path.display(), err))
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            FaceError::NoFaceDetected(_) => "NO_FACE_DETECTED",
            FaceError::NotFound(_) => "NOT_FOUND",
            FaceError::Storage(_) => "STORAGE_FAILURE",
            FaceError::ModelMismatch { .. } => "MODEL_MISMATCH",
            FaceError::InvalidName(_) => "INVALID_NAME",
            FaceError::InvalidImage(_) => "INVALID_IMAGE",
            FaceError::Provider(_) => "PROVIDER_FAILURE",
            FaceError::Timeout(_) => "TIMEOUT",
            FaceError::StoreClosed => "STORE_CLOSED",
        }
    }

    /// HTTP status used when the error crosses the request boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FaceError::NoFaceDetected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FaceError::NotFound(_) => StatusCode::NOT_FOUND,
            FaceError::InvalidName(_) | FaceError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            FaceError::ModelMismatch { .. } => StatusCode::CONFLICT,
            FaceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FaceError::Provider(_) => StatusCode::BAD_GATEWAY,
            FaceError::StoreClosed => StatusCode::SERVICE_UNAVAILABLE,
            FaceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_distinguish_query_outcomes() {
        let no_face = FaceError::NoFaceDetected("blank".into());
        let internal = FaceError::Storage("disk".into());

        assert_eq!(no_face.code(), "NO_FACE_DETECTED");
        assert_eq!(no_face.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(internal.code(), "STORAGE_FAILURE");
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_storage_helper_mentions_path() {
        let err = FaceError::storage(Path::new("/data/profiles/Alice.json"), "denied");
        assert!(err.to_string().contains("Alice.json"));
        assert!(err.to_string().contains("denied"));
    }
}
