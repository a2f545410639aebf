//! Face Identity Matching Service - Main Entry Point
//!
//! Serves identification and profile administration over HTTP while a
//! background task ingests labeled photographs from the inbox.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use facematch::clients::HttpEmbeddingProvider;
use facematch::config::Config;
use facematch::handlers::{self, AppState};
use facematch::services::{FaceExtractor, IdentificationEngine, IngestionPipeline, ProfileStore};
use facematch::traits::EmbeddingProvider;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "facematch=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    config.ensure_dirs()?;

    info!("🚀 Starting Face Matching Service v{}", env!("CARGO_PKG_VERSION"));
    info!("📦 Model: {} (detector: {})", config.model_name, config.detector_backend);
    info!(
        "📏 Metric: {} (threshold: {})",
        config.distance_metric, config.threshold
    );
    info!("🔧 Port: {}", config.port);

    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::from_config(&config)?);
    if provider.is_available() {
        info!("🔌 Embedding provider at {}", config.provider_url);
    } else {
        tracing::warn!("Embedding provider is not configured; identification will fail");
    }
    let extractor = Arc::new(FaceExtractor::new(provider, config.cache_size));

    // Restore persisted profiles
    let store = Arc::new(ProfileStore::new(config.to_store_config(), extractor.clone()));
    match store.load().await {
        Ok(count) => info!("✅ Loaded {} profiles", count),
        Err(e) => {
            tracing::error!("Failed to load profiles: {}", e);
            return Err(e.into());
        }
    }

    let engine = Arc::new(IdentificationEngine::new(
        store.clone(),
        config.distance_metric,
        config.threshold,
    ));

    // Background ingestion
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline = IngestionPipeline::new(store.clone(), config.to_ingest_config());
    let ingest_task = tokio::spawn(pipeline.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = Arc::new(AppState {
        store: store.clone(),
        engine,
        extractor,
        config,
    });
    let app = handlers::router(state);

    // Start server
    info!("✅ Face Matching Service listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = ingest_task.await {
        tracing::error!("Ingestion task failed: {}", e);
    }
    store.close().await;
    info!("👋 Stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
