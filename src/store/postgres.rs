use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use futures::{pin_mut, TryStreamExt};
use std::str::FromStr;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{Json, ToSql};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, instrument};

use super::{
    check_batch, check_query_dimension, collection_not_found, embedding_not_found,
    validate_new_collection, EmbeddingStore, NearestQuery,
};
use crate::errors::{Result, SearchError};
use crate::model::{
    Collection, EmbeddingRecord, Metadata, Metric, NewCollection, ScoredRecord,
};
use crate::schema::MetadataSchema;

/// Builds a connection pool without connecting. The URL is parsed eagerly
/// so a typo fails at startup instead of on the first request.
pub fn create_pool(database_url: &str, max_size: usize) -> Result<Pool> {
    tokio_postgres::Config::from_str(database_url)
        .map_err(|e| SearchError::validation(format!("invalid database url: {e}")))?;

    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_size.max(1)));

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| SearchError::Storage(format!("failed to create database pool: {e}")))
}

/// Postgres + pgvector backend. Vectors travel as pgvector text literals
/// (`[1,2.5,-3]`) so no extra type crate is needed on the client side.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

const COLLECTION_COLUMNS: &str = "name, dimension, metric, metadata_schema, created_at";
const RECORD_COLUMNS: &str = "id, embedding::text AS embedding, metadata, created_at";

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn distance_operator(metric: Metric) -> &'static str {
    match metric {
        Metric::Cosine => "<=>",
        Metric::L2 => "<->",
    }
}

fn nearest_sql(metric: Metric) -> String {
    format!(
        "SELECT id, embedding, metadata, created_at, distance FROM (
            SELECT seq, id, embedding::text AS embedding, metadata, created_at,
                   (embedding {op} $2::text::vector)::float8 AS distance
            FROM embeddings
            WHERE collection = $1
        ) scored
        WHERE distance <> 'NaN'::float8
          AND ($3::float8 IS NULL OR distance <= $3::float8)
        ORDER BY distance, seq
        LIMIT $4::bigint",
        op = distance_operator(metric)
    )
}

pub(crate) fn format_vector(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

pub(crate) fn parse_vector(text: &str) -> Result<Vec<f32>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| SearchError::Storage(format!("malformed vector literal: {text}")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| SearchError::Storage(format!("malformed vector component '{part}': {e}")))
        })
        .collect()
}

fn collection_from_row(row: &Row) -> Result<Collection> {
    let dimension: i32 = row.try_get("dimension")?;
    let metric: String = row.try_get("metric")?;
    let schema: Option<Json<MetadataSchema>> = row.try_get("metadata_schema")?;
    Ok(Collection {
        name: row.try_get("name")?,
        dimension: usize::try_from(dimension)
            .map_err(|_| SearchError::Storage(format!("invalid stored dimension {dimension}")))?,
        metric: metric
            .parse()
            .map_err(|_| SearchError::Storage(format!("invalid stored metric '{metric}'")))?,
        metadata_schema: schema.map(|Json(s)| s),
        created_at: row.try_get("created_at")?,
    })
}

fn record_from_row(row: &Row) -> Result<EmbeddingRecord> {
    let embedding: String = row.try_get("embedding")?;
    let Json(metadata): Json<Metadata> = row.try_get("metadata")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(EmbeddingRecord {
        id: row.try_get("id")?,
        vector: parse_vector(&embedding)?,
        metadata,
        created_at,
    })
}

fn slice_iter<'a>(
    s: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    s.iter().map(|s| *s as _)
}

#[async_trait]
impl EmbeddingStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    #[instrument(skip(self, new), fields(collection = %new.name))]
    async fn create_collection(&self, new: NewCollection) -> Result<Collection> {
        validate_new_collection(&new)?;
        let dimension = i32::try_from(new.dimension)
            .map_err(|_| SearchError::validation("dimension out of range"))?;
        let created_at = Utc::now().trunc_subsecs(6);

        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                "INSERT INTO collections (name, dimension, metric, metadata_schema, created_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (name) DO NOTHING",
                &[
                    &new.name,
                    &dimension,
                    &new.metric.as_str(),
                    &new.metadata_schema.as_ref().map(Json),
                    &created_at,
                ],
            )
            .await?;

        if inserted == 0 {
            return Err(SearchError::conflict(format!(
                "collection '{}' already exists",
                new.name
            )));
        }
        tracing::info!(dimension = new.dimension, metric = %new.metric, "created collection");

        Ok(Collection {
            name: new.name,
            dimension: new.dimension,
            metric: new.metric,
            metadata_schema: new.metadata_schema,
            created_at,
        })
    }

    async fn collection(&self, name: &str) -> Result<Collection> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(&format!(
                "SELECT {COLLECTION_COLUMNS} FROM collections WHERE name = $1"
            ))
            .await?;
        let row = client
            .query_opt(&stmt, &[&name])
            .await?
            .ok_or_else(|| collection_not_found(name))?;
        collection_from_row(&row)
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                format!("SELECT {COLLECTION_COLUMNS} FROM collections ORDER BY name").as_str(),
                &[],
            )
            .await?;
        rows.iter().map(collection_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn drop_collection(&self, name: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let removed = client
            .execute("DELETE FROM collections WHERE name = $1", &[&name])
            .await?;
        Ok(removed > 0)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM collections WHERE name = $1),
                        (SELECT COUNT(*) FROM embeddings WHERE collection = $1)",
                &[&collection],
            )
            .await?;
        let exists: bool = row.try_get(0)?;
        if !exists {
            return Err(collection_not_found(collection));
        }
        let count: i64 = row.try_get(1)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    #[instrument(skip(self, records), fields(batch = records.len()))]
    async fn insert(&self, collection: &str, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Holding a share lock keeps the collection from being dropped
        // mid-batch.
        let row = tx
            .query_opt(
                format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE name = $1 FOR SHARE")
                    .as_str(),
                &[&collection],
            )
            .await?
            .ok_or_else(|| collection_not_found(collection))?;
        let info = collection_from_row(&row)?;
        check_batch(&info, &records)?;

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        if let Some(row) = tx
            .query_opt(
                "SELECT id FROM embeddings WHERE collection = $1 AND id = ANY($2) LIMIT 1",
                &[&collection, &ids],
            )
            .await?
        {
            let existing: String = row.try_get(0)?;
            return Err(SearchError::conflict(format!(
                "embedding '{existing}' already exists in collection '{collection}'"
            )));
        }

        let stmt = tx
            .prepare(
                "INSERT INTO embeddings (collection, id, embedding, metadata, created_at)
                 VALUES ($1, $2, $3::text::vector, $4, $5)",
            )
            .await?;
        for record in &records {
            tx.execute(
                &stmt,
                &[
                    &collection,
                    &record.id,
                    &format_vector(&record.vector),
                    &Json(&record.metadata),
                    &record.created_at,
                ],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    SearchError::conflict(format!(
                        "embedding '{}' already exists in collection '{collection}'",
                        record.id
                    ))
                } else {
                    SearchError::from(e)
                }
            })?;
        }

        tx.commit().await?;
        debug!("inserted batch");
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<EmbeddingRecord> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(&format!(
                "SELECT {RECORD_COLUMNS} FROM embeddings WHERE collection = $1 AND id = $2"
            ))
            .await?;
        let row = client
            .query_opt(&stmt, &[&collection, &id])
            .await?
            .ok_or_else(|| embedding_not_found(collection, id))?;
        record_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM embeddings WHERE collection = $1 AND id = $2",
                &[&collection, &id],
            )
            .await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self, query), fields(k = query.k, metric = %query.metric))]
    async fn nearest(&self, collection: &str, query: &NearestQuery) -> Result<Vec<ScoredRecord>> {
        let info = self.collection(collection).await?;
        check_query_dimension(&info, query)?;

        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(&nearest_sql(query.metric)).await?;

        let literal = format_vector(&query.vector);
        // The metadata filter runs here, so with a filter every candidate
        // row has to be streamed.
        let limit: Option<i64> = match query.filter {
            Some(_) => None,
            None => Some(i64::try_from(query.k).unwrap_or(i64::MAX)),
        };
        let params: [&(dyn ToSql + Sync); 4] =
            [&collection, &literal, &query.max_distance, &limit];

        let rows = client.query_raw(&stmt, slice_iter(&params)).await?;
        pin_mut!(rows);

        let mut hits = Vec::with_capacity(query.k.min(1024));
        while hits.len() < query.k {
            let Some(row) = rows.try_next().await? else {
                break;
            };
            let record = record_from_row(&row)?;
            if !query.admits(&record) {
                continue;
            }
            let distance: f64 = row.try_get("distance")?;
            hits.push(ScoredRecord { record, distance });
        }
        Ok(hits)
    }
}
