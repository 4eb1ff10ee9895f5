use std::sync::Arc;
use std::time::Instant;

use crate::distance::validate_vector;
use crate::embedding::EmbeddingProvider;
use crate::errors::{Result, SearchError};
use crate::metadata_filter::MetadataFilter;
use crate::metrics::get_metrics_collector;
use crate::model::*;
use crate::store::{EmbeddingStore, NearestQuery};

/// Exact k-nearest-neighbor search over a collection.
pub struct QueryEngine {
    store: Arc<dyn EmbeddingStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_top_k: usize,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn EmbeddingStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            max_top_k: crate::defaults::MAX_TOP_K,
        }
    }

    pub fn with_max_top_k(mut self, max_top_k: usize) -> Self {
        self.max_top_k = max_top_k.max(1);
        self
    }

    /// The `k` nearest records under the collection's metric, closest first.
    pub async fn query(&self, collection: &str, vector: Vec<f32>, k: i64) -> Result<Vec<ScoredRecord>> {
        let k = self.validate_k(k)?;
        let info = self.store.collection(collection).await?;
        validate_vector(&vector, info.dimension, info.metric)?;
        self.nearest(collection, NearestQuery::new(vector, k, info.metric)).await
    }

    pub async fn search(&self, request: SearchRequest, default_collection: &str) -> Result<SearchResponse> {
        let _measurement = crate::measure_operation!("query.search");
        let started = Instant::now();
        let collection = request
            .collection
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| default_collection.to_string());

        let result = self.search_inner(&collection, request).await;
        match result {
            Ok((metric, hits)) => {
                let took_ms = started.elapsed().as_millis();
                tracing::debug!(collection = %collection, results = hits.len(), took_ms, "search finished");
                Ok(SearchResponse {
                    collection,
                    metric,
                    results: hits,
                    took_ms,
                })
            }
            Err(e) => {
                get_metrics_collector().record_error("query.search");
                tracing::warn!(collection = %collection, error = %e, "search failed");
                Err(e)
            }
        }
    }

    async fn search_inner(&self, collection: &str, request: SearchRequest) -> Result<(Metric, Vec<SearchHit>)> {
        let k = self.validate_k(request.k)?;
        let filter = match &request.filter {
            Some(value) => Some(
                MetadataFilter::parse(value)
                    .map_err(|e| SearchError::validation(format!("invalid filter: {e}")))?,
            ),
            None => None,
        };
        if let Some(max) = request.max_distance {
            if !max.is_finite() || max < 0.0 {
                return Err(SearchError::validation(
                    "max_distance must be a non-negative number",
                ));
            }
        }

        let info = self.store.collection(collection).await?;
        let metric = request.metric.unwrap_or(info.metric);

        let vector = match (request.vector, request.text.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(SearchError::validation(
                    "provide either a vector or a text query, not both",
                ))
            }
            (Some(vector), None) => vector,
            (None, Some(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(SearchError::validation("query text must not be empty"));
                }
                self.embedder.embed(text).await?
            }
            (None, None) => {
                return Err(SearchError::validation(
                    "a query vector or query text is required",
                ))
            }
        };
        validate_vector(&vector, info.dimension, metric)?;

        let mut query = NearestQuery::new(vector, k, metric);
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            query = query.with_filter(filter);
        }
        if let Some(max) = request.max_distance {
            query = query.with_max_distance(max);
        }

        let hits = self
            .nearest(collection, query)
            .await?
            .into_iter()
            .map(|scored| SearchHit::from_scored(scored, request.include_vectors))
            .collect();
        Ok((metric, hits))
    }

    async fn nearest(&self, collection: &str, query: NearestQuery) -> Result<Vec<ScoredRecord>> {
        let k = query.k;
        let mut hits = self.store.nearest(collection, &query).await?;
        // Backends order by (distance, insertion); the sort is stable so ties
        // keep that order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn validate_k(&self, k: i64) -> Result<usize> {
        if k <= 0 {
            return Err(SearchError::validation(format!("k must be positive, got {k}")));
        }
        match usize::try_from(k) {
            Ok(k) if k <= self.max_top_k => Ok(k),
            _ => Err(SearchError::validation(format!(
                "k must be at most {}, got {k}",
                self.max_top_k
            ))),
        }
    }
}
