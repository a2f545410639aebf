//! Configuration module for the face matching service.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::services::ingest::IngestConfig;
use crate::services::store::StoreConfig;
use crate::services::DistanceMetric;

/// Main service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub data_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub provider_url: String,
    pub model_name: String,
    pub detector_backend: String,
    pub distance_metric: DistanceMetric,
    pub threshold: f32,
    pub ingest_interval_seconds: u64,
    pub ingest_max_concurrency: usize,
    pub ingest_group_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub provider_timeout_seconds: u64,
    pub cache_size: usize,
    pub max_body_bytes: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(env_or("DATA_DIR", "./data".to_string()));
        let inbox_dir = PathBuf::from(env_or("INBOX_DIR", "./inbox".to_string()));
        let errors_dir = std::env::var("ERRORS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| inbox_dir.join("errors"));

        let metric = std::env::var("DISTANCE_METRIC").unwrap_or_else(|_| "cosine".to_string());
        let distance_metric = metric
            .parse::<DistanceMetric>()
            .map_err(anyhow::Error::msg)?;

        let config = Self {
            port: env_or("PORT", 50001),
            host: env_or("HOST", "0.0.0.0".to_string()),
            data_dir,
            inbox_dir,
            errors_dir,
            provider_url: env_or(
                "EMBEDDING_PROVIDER_URL",
                "http://localhost:5005".to_string(),
            ),
            model_name: env_or("FACE_MODEL", "VGG-Face".to_string()),
            detector_backend: env_or("FACE_DETECTOR", "opencv".to_string()),
            distance_metric,
            threshold: env_or("MATCH_THRESHOLD", 0.4),
            ingest_interval_seconds: env_or("INGEST_INTERVAL_SECONDS", 5),
            ingest_max_concurrency: env_or("INGEST_MAX_CONCURRENCY", 4),
            ingest_group_timeout_seconds: env_or("INGEST_GROUP_TIMEOUT_SECONDS", 120),
            request_timeout_seconds: env_or("REQUEST_TIMEOUT_SECONDS", 30),
            provider_timeout_seconds: env_or("PROVIDER_TIMEOUT_SECONDS", 20),
            cache_size: env_or("EMBEDDING_CACHE_SIZE", 1024),
            max_body_bytes: env_or("MAX_BODY_BYTES", 16 * 1024 * 1024),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 2.0) {
            bail!("MATCH_THRESHOLD must be in (0, 2], got {}", self.threshold);
        }
        if self.ingest_interval_seconds == 0 {
            bail!("INGEST_INTERVAL_SECONDS must be positive");
        }
        if self.ingest_max_concurrency == 0 {
            bail!("INGEST_MAX_CONCURRENCY must be positive");
        }
        if self.request_timeout_seconds == 0 {
            bail!("REQUEST_TIMEOUT_SECONDS must be positive");
        }
        Ok(())
    }

    /// Create every working directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.profiles_dir(),
            self.profile_images_dir(),
            self.uploads_dir(),
            self.inbox_dir.clone(),
            self.errors_dir.clone(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }

    pub fn profile_images_dir(&self) -> PathBuf {
        self.data_dir.join("profile_images")
    }

    /// Where transient query images live while they are being identified.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            profiles_dir: self.profiles_dir(),
            images_dir: self.profile_images_dir(),
        }
    }

    pub fn to_ingest_config(&self) -> IngestConfig {
        IngestConfig {
            inbox_dir: self.inbox_dir.clone(),
            errors_dir: self.errors_dir.clone(),
            interval: Duration::from_secs(self.ingest_interval_seconds),
            max_concurrency: self.ingest_max_concurrency,
            group_timeout: Duration::from_secs(self.ingest_group_timeout_seconds),
        }
    }
}
