//! Dense retrieval seams: embedding function and nearest-neighbor index.
//!
//! The real backends (an embedding service, a vector store) live outside this
//! crate. The in-memory implementations here are deterministic and serve tests
//! and single-process deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::RecordId;
use crate::error::{BackendError, BackendResult};
use game_rules::text::tokenize;

/// Turns text into a fixed-length vector.
///
/// Implementations must return the same vector for the same text within a
/// process so rankings stay reproducible.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    async fn embed(&self, text: &str) -> BackendResult<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// Nearest-neighbor search over embedded records.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Insert or replace the vector stored for `id`.
    async fn upsert(&self, id: RecordId, embedding: Vec<f32>) -> BackendResult<()>;

    /// Up to `k` admitted ids ranked by descending similarity.
    ///
    /// `admit` is applied before the top `k` are taken, so a narrow filter
    /// still fills the result from whatever matches it.
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        admit: &(dyn for<'r> Fn(&'r RecordId) -> bool + Sync),
    ) -> BackendResult<Vec<(RecordId, f32)>>;
}

/// Admits every id; for unscoped dense searches.
pub fn admit_all(_id: &RecordId) -> bool {
    true
}

/// Cosine similarity. Zero when either vector has no magnitude or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Bag-of-words embedder that hashes tokens into buckets.
///
/// No semantic generalization, but shared vocabulary yields positive cosine
/// similarity, which is enough to exercise fusion deterministically.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingFunction for HashingEmbedder {
    async fn embed(&self, text: &str) -> BackendResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Brute-force cosine index held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDenseIndex {
    vectors: RwLock<HashMap<RecordId, Vec<f32>>>,
    dimensions: Option<usize>,
}

impl InMemoryDenseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index that rejects vectors of any other length.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            dimensions: Some(dimensions),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    fn check_dimensions(&self, embedding: &[f32]) -> BackendResult<()> {
        match self.dimensions {
            Some(expected) if embedding.len() != expected => Err(BackendError::new(
                "dense",
                format!("expected {} dimensions, got {}", expected, embedding.len()),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DenseIndex for InMemoryDenseIndex {
    async fn upsert(&self, id: RecordId, embedding: Vec<f32>) -> BackendResult<()> {
        self.check_dimensions(&embedding)?;
        self.vectors.write().insert(id, embedding);
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        admit: &(dyn for<'r> Fn(&'r RecordId) -> bool + Sync),
    ) -> BackendResult<Vec<(RecordId, f32)>> {
        self.check_dimensions(embedding)?;
        let vectors = self.vectors.read();
        let mut scored: Vec<(RecordId, f32)> = vectors
            .iter()
            .filter(|(id, _)| admit(*id))
            .map(|(id, vector)| (id.clone(), cosine_similarity(embedding, vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}
