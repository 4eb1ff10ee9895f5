use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::instrument;

use super::{
    check_batch, check_query_dimension, collection_not_found, embedding_not_found,
    validate_new_collection, EmbeddingStore, NearestQuery,
};
use crate::distance;
use crate::errors::{Result, SearchError};
use crate::model::{Collection, EmbeddingRecord, NewCollection, ScoredRecord};

/// In-process store. Writers are serialized by the write lock; readers
/// share the read lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    collections: BTreeMap<String, CollectionData>,
}

struct CollectionData {
    info: Collection,
    ids: HashMap<String, u64>,
    records: BTreeMap<u64, EmbeddingRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self, new), fields(collection = %new.name))]
    async fn create_collection(&self, new: NewCollection) -> Result<Collection> {
        validate_new_collection(&new)?;
        let mut inner = self.inner.write().await;
        if inner.collections.contains_key(&new.name) {
            return Err(SearchError::conflict(format!(
                "collection '{}' already exists",
                new.name
            )));
        }
        let info = Collection {
            name: new.name.clone(),
            dimension: new.dimension,
            metric: new.metric,
            metadata_schema: new.metadata_schema,
            created_at: Utc::now().trunc_subsecs(6),
        };
        inner.collections.insert(
            new.name,
            CollectionData {
                info: info.clone(),
                ids: HashMap::new(),
                records: BTreeMap::new(),
            },
        );
        tracing::info!(collection = %info.name, dimension = info.dimension, metric = %info.metric, "created collection");
        Ok(info)
    }

    async fn collection(&self, name: &str) -> Result<Collection> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(name)
            .map(|c| c.info.clone())
            .ok_or_else(|| collection_not_found(name))
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let inner = self.inner.read().await;
        Ok(inner.collections.values().map(|c| c.info.clone()).collect())
    }

    #[instrument(skip(self))]
    async fn drop_collection(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.collections.remove(name).is_some())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(collection)
            .map(|c| c.records.len())
            .ok_or_else(|| collection_not_found(collection))
    }

    #[instrument(skip(self, records), fields(batch = records.len()))]
    async fn insert(&self, collection: &str, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Inner {
            next_seq,
            collections,
        } = &mut *inner;
        let data = collections
            .get_mut(collection)
            .ok_or_else(|| collection_not_found(collection))?;

        // Every check happens before the first mutation.
        check_batch(&data.info, &records)?;
        if let Some(existing) = records.iter().find(|r| data.ids.contains_key(&r.id)) {
            return Err(SearchError::conflict(format!(
                "embedding '{}' already exists in collection '{collection}'",
                existing.id
            )));
        }

        for record in records {
            let seq = *next_seq;
            *next_seq += 1;
            data.ids.insert(record.id.clone(), seq);
            data.records.insert(seq, record);
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<EmbeddingRecord> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(collection)
            .and_then(|c| c.ids.get(id).and_then(|seq| c.records.get(seq)))
            .cloned()
            .ok_or_else(|| embedding_not_found(collection, id))
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(data) = inner.collections.get_mut(collection) else {
            return Ok(false);
        };
        Ok(match data.ids.remove(id) {
            Some(seq) => data.records.remove(&seq).is_some(),
            None => false,
        })
    }

    #[instrument(skip(self, query), fields(k = query.k, metric = %query.metric))]
    async fn nearest(&self, collection: &str, query: &NearestQuery) -> Result<Vec<ScoredRecord>> {
        let inner = self.inner.read().await;
        let data = inner
            .collections
            .get(collection)
            .ok_or_else(|| collection_not_found(collection))?;
        check_query_dimension(&data.info, query)?;

        let mut scored: Vec<(f64, u64, &EmbeddingRecord)> = data
            .records
            .iter()
            .filter(|(_, record)| query.admits(record))
            .filter_map(|(&seq, record)| {
                distance::distance(query.metric, &query.vector, &record.vector)
                    .filter(|&d| query.within_range(d))
                    .map(|d| (d, seq, record))
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(query.k);

        Ok(scored
            .into_iter()
            .map(|(distance, _, record)| ScoredRecord {
                record: record.clone(),
                distance,
            })
            .collect())
    }
}
