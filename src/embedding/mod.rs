//! Text embedding providers used by document ingestion and text queries.

mod http;
mod mock;

pub use http::{HttpEmbeddingConfig, HttpEmbeddingProvider};
pub use mock::MockEmbeddingProvider;

use async_trait::async_trait;

use crate::errors::Result;

/// Turns text into a vector. Implementations must be cheap to share across
/// request handlers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
