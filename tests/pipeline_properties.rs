//! Store, ingest and query invariants exercised over generated data on the
//! in-memory backend.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok, block_on};

use embedding_search::embedding::MockEmbeddingProvider;
use embedding_search::ingest::Ingestor;
use embedding_search::query::QueryEngine;
use embedding_search::store::{EmbeddingStore, MemoryStore};
use embedding_search::{Metric, NewCollection, NewEmbedding};

const DIM: usize = 6;

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    loop {
        let v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        if v.iter().any(|x| x.abs() > 1e-3) {
            return v;
        }
    }
}

fn setup(metric: Metric) -> (Arc<MemoryStore>, Ingestor, QueryEngine) {
    let store = Arc::new(MemoryStore::new());
    assert_ok!(block_on(store.create_collection(NewCollection {
        name: "props".into(),
        dimension: DIM,
        metric,
        metadata_schema: None,
    })));
    let embedder = Arc::new(MockEmbeddingProvider::new(DIM));
    let ingestor = Ingestor::new(store.clone(), embedder.clone());
    let engine = QueryEngine::new(store.clone(), embedder);
    (store, ingestor, engine)
}

#[test]
fn stored_embeddings_read_back_unchanged() {
    let (store, ingestor, _) = setup(Metric::Cosine);
    let mut rng = StdRng::seed_from_u64(7);

    let batch: Vec<NewEmbedding> = (0..50)
        .map(|i| NewEmbedding {
            id: Some(format!("e{i}")),
            vector: random_vector(&mut rng),
            metadata: Some(json!({"i": i, "tags": ["x", i.to_string()]})),
        })
        .collect();
    let expected = batch.clone();

    let ids = assert_ok!(block_on(ingestor.ingest("props", batch)));
    assert_eq!(ids.len(), expected.len());

    for input in expected {
        let id = input.id.unwrap();
        let record = assert_ok!(block_on(store.get("props", &id)));
        assert_eq!(record.id, id);
        assert_eq!(record.vector, input.vector);
        assert_eq!(serde_json::Value::Object(record.metadata), input.metadata.unwrap());
    }
}

#[test]
fn queries_return_at_most_k_in_distance_order() {
    for metric in [Metric::Cosine, Metric::L2] {
        let (_, ingestor, engine) = setup(metric);
        let mut rng = StdRng::seed_from_u64(42);

        let batch: Vec<NewEmbedding> = (0..200)
            .map(|_| NewEmbedding {
                vector: random_vector(&mut rng),
                ..NewEmbedding::default()
            })
            .collect();
        assert_ok!(block_on(ingestor.ingest("props", batch)));

        for k in [1_i64, 5, 37, 200, 500] {
            let query = random_vector(&mut rng);
            let hits = assert_ok!(block_on(engine.query("props", query, k)));
            assert!(hits.len() <= k as usize);
            assert_eq!(hits.len(), (k as usize).min(200));
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }
}

#[test]
fn equal_distances_keep_insertion_order() {
    let (_, ingestor, engine) = setup(Metric::L2);
    let mut unit = vec![0.0f32; DIM];
    unit[0] = 1.0;

    let batch: Vec<NewEmbedding> = (0..10)
        .map(|i| NewEmbedding {
            id: Some(format!("same-{i}")),
            vector: unit.clone(),
            metadata: None,
        })
        .collect();
    assert_ok!(block_on(ingestor.ingest("props", batch)));

    let hits = assert_ok!(block_on(engine.query("props", vec![0.0; DIM], 10)));
    let ids: Vec<_> = hits.iter().map(|h| h.record.id.clone()).collect();
    let expected: Vec<_> = (0..10).map(|i| format!("same-{i}")).collect();
    assert_eq!(ids, expected);
}

#[test]
fn one_bad_record_writes_nothing() {
    let (store, ingestor, _) = setup(Metric::Cosine);
    let mut rng = StdRng::seed_from_u64(3);

    for bad_at in [0usize, 10, 19] {
        let mut batch: Vec<NewEmbedding> = (0..20)
            .map(|_| NewEmbedding {
                vector: random_vector(&mut rng),
                ..NewEmbedding::default()
            })
            .collect();
        batch[bad_at].vector.push(0.5);

        let err = assert_err!(block_on(ingestor.ingest("props", batch)));
        assert!(err.is_validation());
        assert_eq!(assert_ok!(block_on(store.count("props"))), 0);
    }
}

#[test]
fn non_positive_k_fails() {
    let (_, _, engine) = setup(Metric::L2);
    for k in [0_i64, -1, i64::MIN] {
        let err = assert_err!(block_on(engine.query("props", vec![1.0; DIM], k)));
        assert!(err.is_validation());
    }
}
