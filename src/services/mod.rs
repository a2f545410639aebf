//! Services module.

pub mod cache;
pub mod engine;
pub mod extractor;
pub mod ingest;
pub mod store;
pub mod vector_ops;

pub use cache::EmbeddingCache;
pub use engine::{Identification, IdentificationEngine};
pub use extractor::FaceExtractor;
pub use ingest::{IngestConfig, IngestSummary, IngestionPipeline};
pub use store::{Profile, ProfileStore, ProfileUpdate, RejectedImage, StoreConfig};
pub use vector_ops::{DistanceMetric, VectorOps};
