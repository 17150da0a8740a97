//! Episodic writer - ingests records into both retrieval indices.

use log::debug;
use std::sync::Arc;

use super::{DenseIndex, EmbeddingFunction, LexicalIndex, Record};
use crate::error::BackendResult;

/// Owns ingestion of narrative records.
///
/// Each record is embedded and upserted into the dense index before it
/// becomes visible to lexical search, so a record the lexical catalog knows
/// always has a vector.
pub struct EpisodicStore {
    lexical: Arc<LexicalIndex>,
    dense: Arc<dyn DenseIndex>,
    embedder: Arc<dyn EmbeddingFunction>,
}

impl EpisodicStore {
    pub fn new(
        lexical: Arc<LexicalIndex>,
        dense: Arc<dyn DenseIndex>,
        embedder: Arc<dyn EmbeddingFunction>,
    ) -> Self {
        Self {
            lexical,
            dense,
            embedder,
        }
    }

    /// Write one record.
    pub async fn add(&self, record: Record) -> BackendResult<()> {
        self.add_all(vec![record]).await.map(|_| ())
    }

    /// Write a batch. Returns the lexical index size afterwards.
    ///
    /// Stops at the first backend failure; records before it are indexed in
    /// both indices, the failing record and later ones in neither.
    pub async fn add_all(&self, records: Vec<Record>) -> BackendResult<usize> {
        let mut written: Vec<Arc<Record>> = Vec::with_capacity(records.len());
        let mut failure = None;

        for record in records {
            let stored = self
                .embedder
                .embed(&record.indexed_text())
                .await
                .map(|embedding| (record, embedding));
            let result = match stored {
                Ok((record, embedding)) => self
                    .dense
                    .upsert(record.id.clone(), embedding)
                    .await
                    .map(|_| record),
                Err(e) => Err(e),
            };
            match result {
                Ok(record) => written.push(Arc::new(record)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        debug!("[episodic] writing {} records", written.len());
        let total = self.lexical.index(written);
        match failure {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    pub fn lexical(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    pub fn dense(&self) -> &Arc<dyn DenseIndex> {
        &self.dense
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingFunction> {
        &self.embedder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::memory::{HashingEmbedder, InMemoryDenseIndex};
    use async_trait::async_trait;

    struct FlakyEmbedder;

    #[async_trait]
    impl EmbeddingFunction for FlakyEmbedder {
        async fn embed(&self, text: &str) -> BackendResult<Vec<f32>> {
            if text.contains("poison") {
                Err(BackendError::new("embedder", "refused"))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_add_writes_both_indices() {
        let dense = Arc::new(InMemoryDenseIndex::new());
        let store = EpisodicStore::new(
            Arc::new(LexicalIndex::default()),
            dense.clone(),
            Arc::new(HashingEmbedder::default()),
        );

        store.add(Record::new("s1", "the goblin attacks").with_id("r1")).await.unwrap();

        assert_eq!(store.lexical().len(), 1);
        assert_eq!(dense.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let dense = Arc::new(InMemoryDenseIndex::new());
        let store = EpisodicStore::new(
            Arc::new(LexicalIndex::default()),
            dense.clone(),
            Arc::new(FlakyEmbedder),
        );

        let result = store
            .add_all(vec![
                Record::new("s1", "first").with_id("r1"),
                Record::new("s1", "poison").with_id("r2"),
                Record::new("s1", "third").with_id("r3"),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(store.lexical().len(), 1);
        assert_eq!(dense.len(), 1);
        assert!(store.lexical().get(&"r1".into()).is_some());
    }
}
