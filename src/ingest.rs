use chrono::{SubsecRound, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use crate::chunking::ParagraphChunker;
use crate::defaults;
use crate::distance::validate_vector;
use crate::embedding::EmbeddingProvider;
use crate::errors::{Result, SearchError};
use crate::metrics::get_metrics_collector;
use crate::model::*;
use crate::schema::metadata_size;
use crate::store::EmbeddingStore;

#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_batch_size: usize,
    pub max_metadata_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_batch_size: defaults::MAX_BATCH_SIZE,
            max_metadata_bytes: defaults::MAX_METADATA_BYTES,
        }
    }
}

/// Validates batches against their collection and hands them to the store
/// in a single atomic insert.
pub struct Ingestor {
    store: Arc<dyn EmbeddingStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: ParagraphChunker,
    limits: IngestLimits,
}

impl Ingestor {
    pub fn new(store: Arc<dyn EmbeddingStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            chunker: ParagraphChunker::default(),
            limits: IngestLimits::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: ParagraphChunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_limits(mut self, limits: IngestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Ingest a batch; returns the ids in request order.
    pub async fn ingest(&self, collection: &str, embeddings: Vec<NewEmbedding>) -> Result<Vec<String>> {
        let _measurement = crate::measure_operation!("ingest.embeddings");
        let result = self.ingest_batch(collection, embeddings).await;
        match &result {
            Ok(ids) => tracing::info!(collection, count = ids.len(), "ingested embeddings"),
            Err(e) => {
                get_metrics_collector().record_error("ingest.embeddings");
                tracing::warn!(collection, error = %e, "ingest rejected");
            }
        }
        result
    }

    async fn ingest_batch(&self, collection: &str, embeddings: Vec<NewEmbedding>) -> Result<Vec<String>> {
        if embeddings.is_empty() {
            return Err(SearchError::validation("batch must contain at least one embedding"));
        }
        if embeddings.len() > self.limits.max_batch_size {
            return Err(SearchError::validation(format!(
                "batch of {} embeddings exceeds the limit of {}",
                embeddings.len(),
                self.limits.max_batch_size
            )));
        }

        let info = self.store.collection(collection).await?;

        let mut seen = HashSet::with_capacity(embeddings.len());
        let mut ids = Vec::with_capacity(embeddings.len());
        for embedding in &embeddings {
            let id = normalize_id(embedding.id.as_deref())?;
            if !seen.insert(id.clone()) {
                return Err(SearchError::conflict(format!(
                    "duplicate embedding id '{id}' in batch"
                )));
            }
            ids.push(id);
        }

        for embedding in &embeddings {
            validate_vector(&embedding.vector, info.dimension, info.metric)?;
        }

        let mut metadata = Vec::with_capacity(embeddings.len());
        for embedding in &embeddings {
            metadata.push(self.normalize_metadata(&info, embedding.metadata.as_ref())?);
        }

        let created_at = Utc::now().trunc_subsecs(6);
        let records: Vec<EmbeddingRecord> = embeddings
            .into_iter()
            .zip(ids.iter().cloned())
            .zip(metadata)
            .map(|((embedding, id), metadata)| EmbeddingRecord {
                id,
                vector: embedding.vector,
                metadata,
                created_at,
            })
            .collect();

        self.store.insert(collection, records).await?;
        Ok(ids)
    }

    fn normalize_metadata(&self, info: &Collection, raw: Option<&Value>) -> Result<Metadata> {
        let metadata = match raw {
            None | Some(Value::Null) => Metadata::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(SearchError::validation("metadata must be a JSON object")),
        };
        if let Some(schema) = &info.metadata_schema {
            schema.validate(&metadata)?;
        }
        let size = metadata_size(&metadata)?;
        if size > self.limits.max_metadata_bytes {
            return Err(SearchError::validation(format!(
                "metadata is {size} bytes, the limit is {}",
                self.limits.max_metadata_bytes
            )));
        }
        Ok(metadata)
    }

    /// Chunk, embed and store a document as one atomic batch.
    pub async fn ingest_document(
        &self,
        collection: &str,
        title: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<DocumentResponse> {
        let _measurement = crate::measure_operation!("ingest.document");
        let result = self.ingest_document_inner(collection, title, content, metadata).await;
        if let Err(e) = &result {
            get_metrics_collector().record_error("ingest.document");
            tracing::warn!(collection, error = %e, "document rejected");
        }
        result
    }

    async fn ingest_document_inner(
        &self,
        collection: &str,
        title: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<DocumentResponse> {
        let title = title.trim();
        let content = content.trim();
        if title.is_empty() {
            return Err(SearchError::validation("document title is required"));
        }
        if content.is_empty() {
            return Err(SearchError::validation("document content is required"));
        }
        let base = match metadata {
            None | Some(Value::Null) => Metadata::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(SearchError::validation("metadata must be a JSON object")),
        };

        let document_id = uuid::Uuid::new_v4().to_string();
        let content_sha256 = hex::encode(Sha256::digest(content.as_bytes()));
        let chunks = self.chunker.chunk(content);
        let chunk_count = chunks.len();

        let mut embeddings = Vec::with_capacity(chunk_count);
        for chunk in chunks {
            let vector = self.embedder.embed(&chunk.content).await?;
            let mut meta = base.clone();
            meta.insert("document_id".into(), Value::from(document_id.clone()));
            meta.insert("title".into(), Value::from(title));
            meta.insert("chunk_index".into(), Value::from(chunk.index));
            meta.insert("chunk_count".into(), Value::from(chunk_count));
            meta.insert("content".into(), Value::from(chunk.content));
            meta.insert("content_sha256".into(), Value::from(content_sha256.clone()));
            embeddings.push(NewEmbedding {
                id: Some(format!("{document_id}:{}", chunk.index)),
                vector,
                metadata: Some(Value::Object(meta)),
            });
        }

        let chunk_ids = self.ingest_batch(collection, embeddings).await?;
        tracing::info!(
            collection,
            document_id = %document_id,
            chunks = chunk_count,
            embedder = self.embedder.name(),
            "ingested document"
        );

        Ok(DocumentResponse {
            document_id,
            collection: collection.to_string(),
            chunk_ids,
        })
    }
}

/// Trims a caller-supplied id or mints a UUID v4 when none was given.
pub fn normalize_id(raw: Option<&str>) -> Result<String> {
    let Some(raw) = raw else {
        return Ok(uuid::Uuid::new_v4().to_string());
    };
    let id = raw.trim();
    if id.is_empty() {
        return Err(SearchError::validation("embedding id must not be empty"));
    }
    if id.chars().count() > defaults::MAX_ID_LEN {
        return Err(SearchError::validation(format!(
            "embedding id exceeds {} characters",
            defaults::MAX_ID_LEN
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(SearchError::validation(
            "embedding id must not contain control characters",
        ));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingProvider;
    use crate::schema::{FieldType, MetadataSchema};
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn setup(dimension: usize, schema: Option<MetadataSchema>) -> (Arc<MemoryStore>, Ingestor) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_collection(NewCollection {
                name: "docs".into(),
                dimension,
                metric: Metric::Cosine,
                metadata_schema: schema,
            })
            .await
            .unwrap();
        let ingestor = Ingestor::new(store.clone(), Arc::new(MockEmbeddingProvider::new(dimension)));
        (store, ingestor)
    }

    fn emb(id: Option<&str>, vector: Vec<f32>, metadata: Option<Value>) -> NewEmbedding {
        NewEmbedding {
            id: id.map(str::to_string),
            vector,
            metadata,
        }
    }

    #[tokio::test]
    async fn assigns_ids_and_stores_batch() {
        let (store, ingestor) = setup(3, None).await;
        let ids = ingestor
            .ingest(
                "docs",
                vec![
                    emb(Some("  a  "), vec![1.0, 0.0, 0.0], Some(json!({"k": 1}))),
                    emb(None, vec![0.0, 1.0, 0.0], None),
                ],
            )
            .await
            .unwrap();

        assert_eq!(ids[0], "a");
        assert!(uuid::Uuid::parse_str(&ids[1]).is_ok());
        let stored = store.get("docs", "a").await.unwrap();
        assert_eq!(stored.metadata["k"], json!(1));
        assert_eq!(store.count("docs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn wrong_dimension_leaves_store_unchanged() {
        let (store, ingestor) = setup(3, None).await;
        let err = ingestor
            .ingest(
                "docs",
                vec![
                    emb(Some("ok"), vec![1.0, 0.0, 0.0], None),
                    emb(Some("bad"), vec![1.0, 0.0], None),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::DimensionMismatch { expected: 3, actual: 2 }));
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_bad_vectors_and_metadata() {
        let schema = MetadataSchema::default().field("lang", FieldType::String, true);
        let (store, ingestor) = setup(2, Some(schema)).await;

        let nan = ingestor
            .ingest("docs", vec![emb(None, vec![f32::NAN, 1.0], Some(json!({"lang": "en"})))])
            .await;
        assert!(nan.unwrap_err().is_validation());

        let zero = ingestor
            .ingest("docs", vec![emb(None, vec![0.0, 0.0], Some(json!({"lang": "en"})))])
            .await;
        assert!(zero.unwrap_err().is_validation());

        let missing_field = ingestor
            .ingest("docs", vec![emb(None, vec![1.0, 0.0], Some(json!({})))])
            .await;
        assert!(missing_field.unwrap_err().is_validation());

        let not_object = ingestor
            .ingest("docs", vec![emb(None, vec![1.0, 0.0], Some(json!([1, 2])))])
            .await;
        assert!(not_object.unwrap_err().is_validation());

        assert_eq!(store.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_limits_and_duplicates() {
        let (_store, ingestor) = setup(2, None).await;
        let ingestor = ingestor.with_limits(IngestLimits {
            max_batch_size: 2,
            max_metadata_bytes: 16,
        });

        assert!(ingestor.ingest("docs", vec![]).await.unwrap_err().is_validation());

        let too_many = vec![emb(None, vec![1.0, 0.0], None); 3];
        assert!(ingestor.ingest("docs", too_many).await.unwrap_err().is_validation());

        let dup = vec![
            emb(Some("x"), vec![1.0, 0.0], None),
            emb(Some(" x"), vec![0.0, 1.0], None),
        ];
        assert!(ingestor.ingest("docs", dup).await.unwrap_err().is_conflict());

        let big = vec![emb(None, vec![1.0, 0.0], Some(json!({"text": "much more than sixteen bytes"})))];
        assert!(ingestor.ingest("docs", big).await.unwrap_err().is_validation());

        let missing = ingestor
            .ingest("nope", vec![emb(None, vec![1.0, 0.0], None)])
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn existing_id_is_a_conflict() {
        let (store, ingestor) = setup(2, None).await;
        ingestor
            .ingest("docs", vec![emb(Some("a"), vec![1.0, 0.0], None)])
            .await
            .unwrap();
        let err = ingestor
            .ingest(
                "docs",
                vec![
                    emb(Some("b"), vec![1.0, 0.0], None),
                    emb(Some("a"), vec![0.0, 1.0], None),
                ],
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.count("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn metadata_limit_counts_escaped_bytes() {
        let (store, ingestor) = setup(2, None).await;

        // 10_000 chars in memory, 60_000 bytes once escaped
        let escaped = json!({"t": "\u{1}".repeat(10_000)});
        assert!(escaped.to_string().len() > defaults::MAX_METADATA_BYTES);
        let err = ingestor
            .ingest("docs", vec![emb(None, vec![1.0, 0.0], Some(escaped))])
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.count("docs").await.unwrap(), 0);

        let plain = json!({"t": "x".repeat(10_000)});
        ingestor
            .ingest("docs", vec![emb(None, vec![1.0, 0.0], Some(plain))])
            .await
            .unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 1);
    }

    #[test]
    fn id_rules() {
        assert_eq!(normalize_id(Some(" id-1 ")).unwrap(), "id-1");
        assert!(normalize_id(Some("   ")).is_err());
        assert!(normalize_id(Some("a\u{0007}b")).is_err());
        assert!(normalize_id(Some(&"x".repeat(257))).is_err());
        assert!(normalize_id(Some(&"x".repeat(256))).is_ok());
        assert_eq!(normalize_id(None).unwrap().len(), 36);
    }

    #[tokio::test]
    async fn document_is_chunked_and_annotated() {
        let (store, ingestor) = setup(8, None).await;
        let ingestor = ingestor.with_chunker(ParagraphChunker::new(25));
        let content = "First paragraph here.\n\nSecond one.\n\nThird paragraph text.";

        let response = ingestor
            .ingest_document("docs", "  Notes ", content, Some(json!({"source": "wiki"})))
            .await
            .unwrap();

        assert_eq!(response.chunk_ids.len(), 3);
        assert_eq!(response.chunk_ids[0], format!("{}:0", response.document_id));

        let first = store.get("docs", &response.chunk_ids[0]).await.unwrap();
        assert_eq!(first.metadata["title"], json!("Notes"));
        assert_eq!(first.metadata["source"], json!("wiki"));
        assert_eq!(first.metadata["chunk_index"], json!(0));
        assert_eq!(first.metadata["chunk_count"], json!(3));
        assert_eq!(first.metadata["content"], json!("First paragraph here."));
        assert_eq!(
            first.metadata["content_sha256"],
            json!(hex::encode(Sha256::digest(content.as_bytes())))
        );
    }

    #[tokio::test]
    async fn document_requires_title_and_content() {
        let (store, ingestor) = setup(4, None).await;
        assert!(ingestor.ingest_document("docs", " ", "body", None).await.unwrap_err().is_validation());
        assert!(ingestor.ingest_document("docs", "t", "\n\n", None).await.unwrap_err().is_validation());
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }
}
