use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use std::time::Duration;

use crate::defaults;
use crate::embedding::HttpEmbeddingConfig;
use crate::ingest::IngestLimits;
use crate::model::Metric;
use crate::store::{validate_collection_name, MAX_DIMENSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingBackend {
    Mock,
    Http,
}

fn parse_metric(raw: &str) -> std::result::Result<Metric, String> {
    raw.parse().map_err(|e: crate::errors::SearchError| e.to_string())
}

/// Runtime settings for `serve`. Every flag has an environment fallback.
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to
    #[arg(long, env = "EMBEDDING_SEARCH_BIND", default_value = defaults::DEFAULT_BIND_ADDR)]
    pub bind: String,

    /// Storage backend
    #[arg(long, env = "EMBEDDING_SEARCH_STORAGE", value_enum, default_value = "memory")]
    pub storage: StorageBackend,

    /// PostgreSQL connection string (required for postgres storage)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "EMBEDDING_SEARCH_POOL_SIZE", default_value_t = defaults::POOL_SIZE)]
    pub pool_size: usize,

    /// Apply pending schema migrations before serving
    #[arg(long, env = "EMBEDDING_SEARCH_MIGRATE", default_value_t = false)]
    pub migrate: bool,

    /// Collection used when a request names none; created at startup
    #[arg(long, env = "EMBEDDING_SEARCH_DEFAULT_COLLECTION", default_value = defaults::DEFAULT_COLLECTION)]
    pub default_collection: String,

    #[arg(long, env = "EMBEDDING_SEARCH_DEFAULT_DIMENSION", default_value_t = defaults::DEFAULT_DIMENSION)]
    pub default_dimension: usize,

    /// cosine | l2
    #[arg(long, env = "EMBEDDING_SEARCH_DEFAULT_METRIC", default_value = defaults::DEFAULT_METRIC, value_parser = parse_metric)]
    pub default_metric: Metric,

    /// Text embedding provider for documents and text queries
    #[arg(long, env = "EMBEDDING_SEARCH_EMBEDDING_PROVIDER", value_enum, default_value = "mock")]
    pub embedding_provider: EmbeddingBackend,

    #[arg(long, env = "EMBEDDING_SEARCH_EMBEDDING_URL", default_value = defaults::EMBEDDING_URL)]
    pub embedding_url: String,

    #[arg(long, env = "EMBEDDING_SEARCH_EMBEDDING_TOKEN", hide_env_values = true)]
    pub embedding_token: Option<String>,

    #[arg(long, env = "EMBEDDING_SEARCH_EMBEDDING_TIMEOUT_SECS", default_value_t = defaults::EMBEDDING_TIMEOUT_SECS)]
    pub embedding_timeout_secs: u64,

    #[arg(long, env = "EMBEDDING_SEARCH_EMBEDDING_MAX_ATTEMPTS", default_value_t = defaults::EMBEDDING_MAX_ATTEMPTS)]
    pub embedding_max_attempts: u32,

    #[arg(long, env = "EMBEDDING_SEARCH_CHUNK_MAX_CHARS", default_value_t = defaults::CHUNK_MAX_CHARS)]
    pub chunk_max_chars: usize,

    #[arg(long, env = "EMBEDDING_SEARCH_MAX_TOP_K", default_value_t = defaults::MAX_TOP_K)]
    pub max_top_k: usize,

    #[arg(long, env = "EMBEDDING_SEARCH_MAX_BATCH_SIZE", default_value_t = defaults::MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    #[arg(long, env = "EMBEDDING_SEARCH_MAX_METADATA_BYTES", default_value_t = defaults::MAX_METADATA_BYTES)]
    pub max_metadata_bytes: usize,

    /// Largest accepted request body; bigger bodies get 413
    #[arg(long, env = "EMBEDDING_SEARCH_MAX_BODY_BYTES", default_value_t = defaults::MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    #[arg(long, env = "EMBEDDING_SEARCH_REQUEST_TIMEOUT_SECS", default_value_t = defaults::REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: defaults::DEFAULT_BIND_ADDR.to_string(),
            storage: StorageBackend::Memory,
            database_url: None,
            pool_size: defaults::POOL_SIZE,
            migrate: false,
            default_collection: defaults::DEFAULT_COLLECTION.to_string(),
            default_dimension: defaults::DEFAULT_DIMENSION,
            default_metric: Metric::Cosine,
            embedding_provider: EmbeddingBackend::Mock,
            embedding_url: defaults::EMBEDDING_URL.to_string(),
            embedding_token: None,
            embedding_timeout_secs: defaults::EMBEDDING_TIMEOUT_SECS,
            embedding_max_attempts: defaults::EMBEDDING_MAX_ATTEMPTS,
            chunk_max_chars: defaults::CHUNK_MAX_CHARS,
            max_top_k: defaults::MAX_TOP_K,
            max_batch_size: defaults::MAX_BATCH_SIZE,
            max_metadata_bytes: defaults::MAX_METADATA_BYTES,
            max_body_bytes: defaults::MAX_BODY_BYTES,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    /// Rejects settings that cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::Postgres
            && self.database_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            bail!("DATABASE_URL is required when EMBEDDING_SEARCH_STORAGE=postgres");
        }
        if self.migrate && self.storage != StorageBackend::Postgres {
            bail!("--migrate only applies to postgres storage");
        }
        if self.pool_size == 0 {
            bail!("pool size must be at least 1");
        }
        if let Err(e) = validate_collection_name(&self.default_collection) {
            bail!("default collection: {e}");
        }
        if self.default_dimension == 0 || self.default_dimension > MAX_DIMENSION {
            bail!("default dimension must be between 1 and {MAX_DIMENSION}");
        }
        if self.embedding_provider == EmbeddingBackend::Http && self.embedding_url.trim().is_empty() {
            bail!("an embedding URL is required for the http embedding provider");
        }
        for (name, value) in [
            ("embedding timeout", self.embedding_timeout_secs as usize),
            ("embedding attempts", self.embedding_max_attempts as usize),
            ("chunk size", self.chunk_max_chars),
            ("max top k", self.max_top_k),
            ("max batch size", self.max_batch_size),
            ("max metadata bytes", self.max_metadata_bytes),
            ("max body bytes", self.max_body_bytes),
            ("request timeout", self.request_timeout_secs as usize),
        ] {
            if value == 0 {
                bail!("{name} must be positive");
            }
        }
        Ok(())
    }

    pub fn http_embedding(&self) -> HttpEmbeddingConfig {
        HttpEmbeddingConfig {
            base_url: self.embedding_url.clone(),
            api_token: self.embedding_token.clone(),
            timeout: Duration::from_secs(self.embedding_timeout_secs),
            max_attempts: self.embedding_max_attempts,
        }
    }

    pub fn ingest_limits(&self) -> IngestLimits {
        IngestLimits {
            max_batch_size: self.max_batch_size,
            max_metadata_bytes: self.max_metadata_bytes,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
