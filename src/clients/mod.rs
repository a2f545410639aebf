//! Embedding provider clients.

pub mod http;

pub use http::HttpEmbeddingProvider;
