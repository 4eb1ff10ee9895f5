//! Embedding Search
//!
//! An embedding store and similarity search service. Records live in a
//! Postgres + pgvector database (or an in-process store for tests and local
//! runs) and are queried by exact nearest-neighbor search.

pub mod api;
pub mod chunking;
pub mod config;
pub mod distance;
pub mod embedding;
pub mod ingest;
pub mod metadata_filter;
pub mod metrics;
pub mod model;
pub mod query;
pub mod schema;
pub mod store;

pub use model::*;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8081";
    pub const DEFAULT_COLLECTION: &str = "default";
    pub const DEFAULT_DIMENSION: usize = 768;
    pub const DEFAULT_METRIC: &str = "cosine";
    pub const DEFAULT_TOP_K: i64 = 10;
    pub const MAX_TOP_K: usize = 1000;
    pub const MAX_BATCH_SIZE: usize = 1000;
    pub const MAX_METADATA_BYTES: usize = 40 * 1024;
    pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
    pub const MAX_ID_LEN: usize = 256;
    pub const CHUNK_MAX_CHARS: usize = 1200;
    pub const POOL_SIZE: usize = 16;
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const EMBEDDING_URL: &str = "http://localhost:8000";
    pub const EMBEDDING_TIMEOUT_SECS: u64 = 10;
    pub const EMBEDDING_MAX_ATTEMPTS: u32 = 3;
}

/// Error types for the embedding store and its pipelines
pub mod errors {
    pub type Result<T> = std::result::Result<T, SearchError>;

    #[derive(Debug, thiserror::Error)]
    pub enum SearchError {
        #[error("{0}")]
        Validation(String),

        #[error("invalid dimension: expected {expected}, got {actual}")]
        DimensionMismatch { expected: usize, actual: usize },

        #[error("{0}")]
        NotFound(String),

        #[error("{0}")]
        Conflict(String),

        #[error("embedding failed: {0}")]
        Embedding(String),

        #[error("storage error: {0}")]
        Storage(String),
    }

    impl SearchError {
        pub fn validation(msg: impl Into<String>) -> Self {
            SearchError::Validation(msg.into())
        }

        pub fn not_found(msg: impl Into<String>) -> Self {
            SearchError::NotFound(msg.into())
        }

        pub fn conflict(msg: impl Into<String>) -> Self {
            SearchError::Conflict(msg.into())
        }

        /// Bad dimension, bad schema or otherwise malformed input.
        pub fn is_validation(&self) -> bool {
            matches!(
                self,
                SearchError::Validation(_) | SearchError::DimensionMismatch { .. }
            )
        }

        pub fn is_not_found(&self) -> bool {
            matches!(self, SearchError::NotFound(_))
        }

        pub fn is_conflict(&self) -> bool {
            matches!(self, SearchError::Conflict(_))
        }
    }

    impl From<tokio_postgres::Error> for SearchError {
        fn from(e: tokio_postgres::Error) -> Self {
            SearchError::Storage(e.to_string())
        }
    }

    impl From<deadpool_postgres::PoolError> for SearchError {
        fn from(e: deadpool_postgres::PoolError) -> Self {
            SearchError::Storage(format!("failed to get postgres connection: {e}"))
        }
    }
}
