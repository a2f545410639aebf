//! Face identity matching service.
//!
//! Keeps a directory-backed store of named face profiles, fills it from an
//! inbox of labeled photographs, and answers "who is this?" over HTTP.
//! Face detection and embedding run in an external service.

pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use clients::HttpEmbeddingProvider;
pub use config::Config;
pub use error::{FaceError, Result};
pub use services::{
    DistanceMetric, FaceExtractor, Identification, IdentificationEngine, IngestionPipeline,
    Profile, ProfileStore,
};
pub use traits::EmbeddingProvider;
