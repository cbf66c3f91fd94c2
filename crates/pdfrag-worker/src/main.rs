use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use pdfrag_core::cache::ProgressCache;
use pdfrag_core::catalog::{DbPool, Repository};
use pdfrag_core::config::Settings;
use pdfrag_core::embedding::HttpEmbedder;
use pdfrag_core::ingest::ChunkPlanner;
use pdfrag_core::parse::PdfParser;
use pdfrag_core::queue::RedisWorkQueue;
use pdfrag_core::storage::BlobStore;
use pdfrag_worker::{IngestProcessor, Worker};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,pdfrag_worker=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("🚀 Starting pdfrag ingestion worker...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Initialize database pool
    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.migrate().await?;
    info!("✅ Database connection established");

    let repository = Arc::new(Repository::new(db_pool));

    let cache = ProgressCache::connect(&settings.redis).await?;
    info!("✅ Progress cache connected");

    let queue = Arc::new(RedisWorkQueue::connect(&settings.redis.url, &settings.queue).await?);
    info!("✅ Work queue connected");

    let blob_store = BlobStore::new(&settings.storage).await?;
    info!("✅ Blob store ready");

    let embedder = Arc::new(HttpEmbedder::new(&settings.embedding)?);
    let planner = ChunkPlanner::new(&settings.chunking)?;

    let processor = Arc::new(IngestProcessor::new(
        repository.clone(),
        cache,
        blob_store,
        Arc::new(PdfParser),
        embedder,
        planner,
        Duration::from_secs(settings.worker.parse_timeout_seconds),
    ));

    let worker = Worker::new(settings, repository, queue, processor);
    info!("✅ Worker initialized");

    // Run worker (blocks until shutdown signal)
    match worker.run().await {
        Ok(_) => info!("Worker stopped gracefully"),
        Err(e) => error!("Worker error: {}", e),
    }

    Ok(())
}
