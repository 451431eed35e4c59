//! Deterministic embedder for tests and offline indexing.

use async_trait::async_trait;

use review_core::{Embedder, Result, DEFAULT_DIMENSION};

use crate::onnx::l2_normalize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Mock embedder for testing.
///
/// Uses feature hashing over lowercased alphanumeric tokens, so texts that
/// share words have positive cosine similarity. Text without any tokens maps
/// to the zero vector.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    max_tokens: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder with default settings.
    pub fn new() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            max_tokens: 512,
        }
    }

    /// Create a mock embedder with custom settings.
    pub fn with_config(dimension: usize, max_tokens: usize) -> Self {
        Self {
            dimension,
            max_tokens,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }

        for token in tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            // High bit picks the sign so collisions partially cancel
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            embedding[slot] += sign;
        }

        l2_normalize(embedding)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |acc, b| {
        (acc ^ *b as u64).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        // Rough approximation: ~4 chars per token
        Ok(text.len() / 4 + 1)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}
