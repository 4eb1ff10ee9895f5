use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::SearchError;
use crate::schema::MetadataSchema;

/// Record metadata: string keys to arbitrary JSON values.
pub type Metadata = serde_json::Map<String, Value>;

/// Distance function used to rank neighbors. Smaller is closer for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[serde(alias = "angular")]
    Cosine,
    #[serde(alias = "euclidean")]
    L2,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" | "angular" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            other => Err(SearchError::validation(format!(
                "unsupported metric: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCollection {
    pub name: String,
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: Metric,
    #[serde(default)]
    pub metadata_schema: Option<MetadataSchema>,
}

fn default_metric() -> Metric {
    Metric::Cosine
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_schema: Option<MetadataSchema>,
    pub created_at: DateTime<Utc>,
}

/// A stored embedding. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// An embedding as submitted for ingestion, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEmbedding {
    #[serde(default)]
    pub id: Option<String>,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// A record paired with its distance to the query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: EmbeddingRecord,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub distance: f64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl SearchHit {
    pub fn from_scored(scored: ScoredRecord, include_vector: bool) -> Self {
        let ScoredRecord { record, distance } = scored;
        Self {
            id: record.id,
            distance,
            metadata: record.metadata,
            created_at: record.created_at,
            vector: include_vector.then_some(record.vector),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub collection: Option<String>,
    pub embeddings: Vec<NewEmbedding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub collection: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_top_k")]
    pub k: i64,
    #[serde(default)]
    pub metric: Option<Metric>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub max_distance: Option<f64>,
    #[serde(default)]
    pub include_vectors: bool,
}

fn default_top_k() -> i64 {
    crate::defaults::DEFAULT_TOP_K
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub collection: String,
    pub metric: Metric,
    pub results: Vec<SearchHit>,
    pub took_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    #[serde(default)]
    pub collection: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub document_id: String,
    pub collection: String,
    pub chunk_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metric_accepts_aliases() {
        assert_eq!("euclidean".parse::<Metric>().unwrap(), Metric::L2);
        assert_eq!(" Cosine ".parse::<Metric>().unwrap(), Metric::Cosine);
        assert!("dot".parse::<Metric>().unwrap_err().is_validation());

        let parsed: Metric = serde_json::from_value(json!("angular")).unwrap();
        assert_eq!(parsed, Metric::Cosine);
        assert_eq!(serde_json::to_value(Metric::L2).unwrap(), json!("l2"));
    }

    #[test]
    fn search_request_defaults() {
        let req: SearchRequest = serde_json::from_value(json!({"vector": [1.0, 0.0]})).unwrap();
        assert_eq!(req.k, 10);
        assert!(req.metric.is_none());
        assert!(!req.include_vectors);
    }

    #[test]
    fn hit_omits_vector_unless_requested() {
        let scored = ScoredRecord {
            record: EmbeddingRecord {
                id: "a".into(),
                vector: vec![1.0, 2.0],
                metadata: Metadata::new(),
                created_at: Utc::now(),
            },
            distance: 0.5,
        };
        let hidden = serde_json::to_value(SearchHit::from_scored(scored.clone(), false)).unwrap();
        assert!(hidden.get("vector").is_none());
        let shown = serde_json::to_value(SearchHit::from_scored(scored, true)).unwrap();
        assert_eq!(shown["vector"], json!([1.0, 2.0]));
    }
}
