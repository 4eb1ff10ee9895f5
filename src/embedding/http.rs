use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingProvider;
use crate::errors::{Result, SearchError};

#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: crate::defaults::EMBEDDING_URL.to_string(),
            api_token: None,
            timeout: Duration::from_secs(crate::defaults::EMBEDDING_TIMEOUT_SECS),
            max_attempts: crate::defaults::EMBEDDING_MAX_ATTEMPTS,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

/// Calls an external embedding service: `POST {base_url}/embed` with
/// `{"text": ...}`, answered by `{"embedding": [...]}`.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
    max_attempts: u32,
}

impl HttpEmbeddingProvider {
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchError::Embedding(format!("failed to build http client: {e}")))?;
        let endpoint = format!("{}/embed", config.base_url.trim_end_matches('/'));
        let api_token = config.api_token.filter(|t| !t.trim().is_empty());

        Ok(Self {
            client,
            endpoint,
            api_token,
            max_attempts: config.max_attempts.max(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, text: &str) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.post(&self.endpoint).json(&EmbedRequest { text });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        request.send().await
    }

    /// Transport failures are retried with exponential backoff; HTTP error
    /// statuses are not.
    async fn send_with_retry(&self, text: &str) -> Result<reqwest::Response> {
        let mut backoff = Duration::from_millis(100);
        let mut attempt = 1;
        loop {
            match self.send_once(text).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_attempts && (e.is_connect() || e.is_timeout()) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, endpoint = %self.endpoint, "embedding request failed");
                    return Err(SearchError::Embedding(
                        "could not reach embedding service".to_string(),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self.send_with_retry(text).await?;
        let status = response.status();

        if status.is_client_error() {
            tracing::error!(%status, "embedding service rejected request");
            return Err(SearchError::Embedding(format!(
                "bad request while querying for embeddings: {status}"
            )));
        }
        if !status.is_success() {
            tracing::error!(%status, "embedding service error");
            return Err(SearchError::Embedding(format!(
                "embedding service error: {status}"
            )));
        }

        let body: EmbedResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "embedding service returned invalid format");
            SearchError::Embedding("embedding service returned invalid format".to_string())
        })?;

        match body.embedding {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(SearchError::Embedding(
                "embedding service returned no vector".to_string(),
            )),
        }
    }
}
