use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{info, warn};

mod admission;
mod error;
mod handlers;
mod state;

use admission::AdmissionService;
use pdfrag_core::cache::ProgressCache;
use pdfrag_core::catalog::{DbPool, Repository};
use pdfrag_core::chat::ChatOrchestrator;
use pdfrag_core::config::Settings;
use pdfrag_core::embedding::HttpEmbedder;
use pdfrag_core::queue::RedisWorkQueue;
use pdfrag_core::retrieval::Retriever;
use pdfrag_core::storage::BlobStore;
use pdfrag_core::synthesis::HttpSynthesizer;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,pdfrag_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("🚀 Starting pdfrag API server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Initialize database pool and schema
    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.migrate().await?;
    info!("✅ Database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));

    // Progress cache + work queue share the redis instance
    let cache = ProgressCache::connect(&settings.redis).await?;
    info!("✅ Progress cache connected");

    let queue = Arc::new(RedisWorkQueue::connect(&settings.redis.url, &settings.queue).await?);
    info!("✅ Work queue connected");

    let blob_store = BlobStore::new(&settings.storage).await?;
    info!("✅ Blob store ready");

    // Upstream model clients
    let embedder = Arc::new(HttpEmbedder::new(&settings.embedding)?);
    let synthesizer = Arc::new(HttpSynthesizer::new(&settings.synthesizer)?);

    let retriever = Arc::new(Retriever::new(
        repository.clone(),
        embedder.clone(),
        settings.retrieval.clone(),
    ));

    match retriever.verify_index().await {
        Ok(true) => info!("✅ ANN index verified"),
        Ok(false) => warn!("⚠️  ANN index missing; search runs degraded"),
        Err(e) => warn!("Failed to verify ANN index: {}", e),
    }

    let chat = Arc::new(ChatOrchestrator::new(
        retriever.clone(),
        synthesizer,
        settings.synthesizer.model.clone(),
        settings.synthesizer.context_budget_tokens,
    ));

    let admission = AdmissionService::new(
        repository.clone(),
        blob_store.clone(),
        cache.clone(),
        queue,
        settings.server.max_files_per_upload,
        settings.server.max_upload_bytes,
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let body_limit = settings
        .server
        .max_upload_bytes
        .saturating_mul(settings.server.max_files_per_upload)
        .saturating_add(1024 * 1024);

    let app_state = Arc::new(AppState {
        db_pool,
        repository,
        cache,
        blob_store,
        admission,
        retriever,
        chat,
    });

    let app = build_router(app_state, body_limit);

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}

fn build_router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/upload", post(handlers::upload::upload_handler))
        .route("/status/{task_id}", get(handlers::tasks::status_handler))
        .route("/result/{task_id}", get(handlers::tasks::result_handler))
        .route("/tasks", get(handlers::tasks::list_tasks_handler))
        .route("/task/{task_id}", delete(handlers::tasks::delete_task_handler))
        .route("/documents", get(handlers::documents::list_documents_handler))
        .route("/documents/{id}", get(handlers::documents::get_document_handler))
        .route("/users", post(handlers::users::create_user_handler))
        .route("/users/{id}", get(handlers::users::get_user_handler))
        .route("/chat", post(handlers::chat::chat_handler))
        .with_state(state)
        // CORS
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        // Body limit covers a full multipart batch
        .layer(DefaultBodyLimit::max(body_limit))
}
