//! Embedding storage backends.
//!
//! [`EmbeddingStore`] is the seam between the pipelines and persistence.
//! [`PgStore`] is the durable backend (Postgres + pgvector); [`MemoryStore`]
//! keeps everything in process for tests and single-node experiments. Both
//! enforce the same invariants: fixed dimension per collection, unique ids,
//! all-or-nothing batch inserts and distance ordering with insertion-order
//! tie-breaks.

mod memory;
mod migrations;
mod postgres;

pub use memory::MemoryStore;
pub use migrations::run_migrations;
pub use postgres::{create_pool, PgStore};

use async_trait::async_trait;
use std::collections::HashSet;

use crate::errors::{Result, SearchError};
use crate::metadata_filter::MetadataFilter;
use crate::model::{Collection, EmbeddingRecord, Metric, NewCollection, ScoredRecord};

/// pgvector refuses wider vectors.
pub const MAX_DIMENSION: usize = 16_000;
pub const MAX_COLLECTION_NAME_LEN: usize = 63;

#[derive(Debug, Clone)]
pub struct NearestQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub metric: Metric,
    pub filter: Option<MetadataFilter>,
    pub max_distance: Option<f64>,
}

impl NearestQuery {
    pub fn new(vector: Vec<f32>, k: usize, metric: Metric) -> Self {
        Self {
            vector,
            k,
            metric,
            filter: None,
            max_distance: None,
        }
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = Some(max_distance);
        self
    }

    fn admits(&self, record: &EmbeddingRecord) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |f| f.matches_map(&record.metadata))
    }

    fn within_range(&self, distance: f64) -> bool {
        self.max_distance.map_or(true, |max| distance <= max)
    }
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Short backend name for health output and logs.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    async fn create_collection(&self, new: NewCollection) -> Result<Collection>;

    async fn collection(&self, name: &str) -> Result<Collection>;

    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Idempotent. Returns whether the collection existed.
    async fn drop_collection(&self, name: &str) -> Result<bool>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Writes the whole batch or nothing.
    async fn insert(&self, collection: &str, records: Vec<EmbeddingRecord>) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<EmbeddingRecord>;

    /// Idempotent. Returns whether a record was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// At most `k` records ordered by ascending distance, ties broken by
    /// insertion order. Records whose distance is undefined (zero vectors
    /// under cosine) are skipped.
    async fn nearest(&self, collection: &str, query: &NearestQuery) -> Result<Vec<ScoredRecord>>;
}

pub fn validate_new_collection(new: &NewCollection) -> Result<()> {
    validate_collection_name(&new.name)?;
    if new.dimension == 0 || new.dimension > MAX_DIMENSION {
        return Err(SearchError::validation(format!(
            "dimension must be between 1 and {MAX_DIMENSION}, got {}",
            new.dimension
        )));
    }
    Ok(())
}

pub fn validate_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            name.len() <= MAX_COLLECTION_NAME_LEN
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SearchError::validation(format!(
            "invalid collection name '{name}': use up to {MAX_COLLECTION_NAME_LEN} letters, digits, '_' or '-', starting with a letter or digit"
        )))
    }
}

/// Store-level batch checks shared by the backends: dimension and
/// in-batch id uniqueness.
pub(crate) fn check_batch(collection: &Collection, records: &[EmbeddingRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if record.vector.len() != collection.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: collection.dimension,
                actual: record.vector.len(),
            });
        }
        if !seen.insert(record.id.as_str()) {
            return Err(SearchError::conflict(format!(
                "duplicate embedding id '{}' in batch",
                record.id
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_query_dimension(collection: &Collection, query: &NearestQuery) -> Result<()> {
    if query.vector.len() != collection.dimension {
        return Err(SearchError::DimensionMismatch {
            expected: collection.dimension,
            actual: query.vector.len(),
        });
    }
    Ok(())
}

pub(crate) fn collection_not_found(name: &str) -> SearchError {
    SearchError::not_found(format!("collection '{name}' not found"))
}

pub(crate) fn embedding_not_found(collection: &str, id: &str) -> SearchError {
    SearchError::not_found(format!(
        "embedding '{id}' not found in collection '{collection}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names() {
        assert!(validate_collection_name("default").is_ok());
        assert!(validate_collection_name("docs_v2-en").is_ok());
        assert!(validate_collection_name("9lives").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("_hidden").is_err());
        assert!(validate_collection_name("has space").is_err());
        assert!(validate_collection_name(&"a".repeat(64)).is_err());
        assert!(validate_collection_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn dimension_bounds() {
        let mut new = NewCollection {
            name: "c".into(),
            dimension: 0,
            metric: Metric::L2,
            metadata_schema: None,
        };
        assert!(validate_new_collection(&new).is_err());
        new.dimension = MAX_DIMENSION + 1;
        assert!(validate_new_collection(&new).is_err());
        new.dimension = 3;
        assert!(validate_new_collection(&new).is_ok());
    }
}
