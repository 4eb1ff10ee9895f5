use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::EmbeddingProvider;
use crate::errors::Result;

/// Deterministic pseudo-embeddings for local runs and tests. The same text
/// always yields the same vector; there is no semantic similarity.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(fnv1a(text.as_bytes()));
        (0..self.dimension)
            .map(|_| rng.gen_range(-1.0f32..1.0f32))
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

/// 64-bit FNV-1a; stable across platforms and releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_per_text() {
        let provider = MockEmbeddingProvider::new(16);
        let a = provider.embed("quarterly report").await.unwrap();
        let b = provider.embed("quarterly report").await.unwrap();
        let c = provider.embed("annual report").await.unwrap();

        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|x| (-1.0..1.0).contains(x)));
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
