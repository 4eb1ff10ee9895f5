use anyhow::Context;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{serve, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::chunking::ParagraphChunker;
use crate::config::{EmbeddingBackend, ServiceConfig, StorageBackend};
use crate::embedding::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
use crate::ingest::Ingestor;
use crate::metrics::get_metrics_collector;
use crate::model::NewCollection;
use crate::query::QueryEngine;
use crate::store::{self, EmbeddingStore, MemoryStore, PgStore};

pub mod collections;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod search;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EmbeddingStore>,
    pub ingest: Arc<Ingestor>,
    pub query: Arc<QueryEngine>,
    pub default_collection: String,
}

impl AppState {
    pub fn new(
        config: &ServiceConfig,
        store: Arc<dyn EmbeddingStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let ingest = Ingestor::new(store.clone(), embedder.clone())
            .with_chunker(ParagraphChunker::new(config.chunk_max_chars))
            .with_limits(config.ingest_limits());
        let query = QueryEngine::new(store.clone(), embedder).with_max_top_k(config.max_top_k);

        Self {
            store,
            ingest: Arc::new(ingest),
            query: Arc::new(query),
            default_collection: config.default_collection.clone(),
        }
    }

    pub(crate) fn collection_or_default(&self, collection: Option<String>) -> String {
        collection
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| self.default_collection.clone())
    }
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "storage": state.store.backend(),
            "version": crate::VERSION,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "storage": state.store.backend(),
                    "version": crate::VERSION,
                })),
            )
                .into_response()
        }
    }
}

async fn metrics() -> impl IntoResponse {
    Json(json!({ "operations": get_metrics_collector().snapshot() }))
}

pub fn router(state: AppState, config: &ServiceConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/collections", post(collections::create).get(collections::list))
        .route("/collections/:name", get(collections::get).delete(collections::remove))
        .route("/embeddings", post(embeddings::ingest))
        .route("/embeddings/:id", get(embeddings::get).delete(embeddings::delete))
        .route("/search", post(search::search))
        .route("/documents", post(documents::ingest))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn build_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn EmbeddingStore>> {
    let store: Arc<dyn EmbeddingStore> = match config.storage {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for postgres storage")?;
            let pool = store::create_pool(url, config.pool_size)?;
            if config.migrate {
                store::run_migrations(&pool)
                    .await
                    .context("failed to apply migrations")?;
            }
            Arc::new(PgStore::new(pool))
        }
    };
    Ok(store)
}

pub fn build_embedder(config: &ServiceConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding_provider {
        EmbeddingBackend::Mock => Arc::new(MockEmbeddingProvider::new(config.default_dimension)),
        EmbeddingBackend::Http => Arc::new(HttpEmbeddingProvider::new(config.http_embedding())?),
    };
    Ok(embedder)
}

/// Creates the default collection unless it already exists.
pub async fn ensure_default_collection(
    store: &dyn EmbeddingStore,
    config: &ServiceConfig,
) -> anyhow::Result<()> {
    match store.collection(&config.default_collection).await {
        Ok(existing) => {
            if existing.dimension != config.default_dimension || existing.metric != config.default_metric {
                tracing::warn!(
                    collection = %existing.name,
                    dimension = existing.dimension,
                    metric = %existing.metric,
                    "default collection exists with different settings; keeping the stored ones"
                );
            }
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            let created = store
                .create_collection(NewCollection {
                    name: config.default_collection.clone(),
                    dimension: config.default_dimension,
                    metric: config.default_metric,
                    metadata_schema: None,
                })
                .await;
            match created {
                Ok(_) => Ok(()),
                // Another replica won the race.
                Err(e) if e.is_conflict() => Ok(()),
                Err(e) => Err(e).context("failed to create default collection"),
            }
        }
        Err(e) => Err(e).context("failed to look up default collection"),
    }
}

pub async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    config.validate()?;

    let store = build_store(&config).await?;
    store
        .ping()
        .await
        .with_context(|| format!("{} storage is not reachable", store.backend()))?;
    ensure_default_collection(store.as_ref(), &config).await?;
    let embedder = build_embedder(&config)?;

    tracing::info!(
        storage = store.backend(),
        embedder = embedder.name(),
        default_collection = %config.default_collection,
        "services initialised"
    );

    let state = AppState::new(&config, store, embedder);
    let app = router(state, &config);

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("API listening on {}", config.bind);
    serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
