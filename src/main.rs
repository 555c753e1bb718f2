mod config;
mod db;
mod error;
mod handlers;
mod models;
mod services;
mod storage;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::IngestService;
use crate::storage::{BlobStore, LocalBlobStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub blobs: Arc<dyn BlobStore>,
    pub ingest: IngestService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dedupstore=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dedupstore...");

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path, config.database.max_connections).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Initialize blob store
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.storage.local_path));
    tracing::info!(
        "Blob store ready ({}) at {}",
        blobs.storage_type(),
        config.storage.local_path
    );

    let state = AppState {
        ingest: IngestService::new(db.clone(), blobs.clone()),
        db,
        config: config.clone(),
        blobs,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let file_routes = Router::new()
        .route(
            "/files",
            get(handlers::file::list_files).post(handlers::file::upload_file),
        )
        .route("/files/stats", get(handlers::file::get_stats))
        .route(
            "/files/hash/:content_hash",
            get(handlers::file::get_file_by_hash),
        )
        .route("/files/:id", get(handlers::file::get_file))
        .route("/files/:id/download", get(handlers::file::download_file))
        // Upload size is enforced while spooling
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .nest("/api/v1", file_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
